use std::collections::{BTreeMap, BTreeSet};

use crate::domain::models::{CredentialId, TenancyMode, TenantId};

pub type CredentialMap = BTreeMap<TenantId, BTreeSet<CredentialId>>;

/// Tenant scopes to search for the owner of a tick arriving from `origin`.
///
/// An enterprise with no children yields an empty list; downstream this is
/// simply "no sessions found".
pub fn resolve_tenant_scopes(
    origin: &TenantId,
    mode: TenancyMode,
    enterprise_children: Vec<TenantId>,
) -> Vec<TenantId> {
    match mode {
        TenancyMode::SingleTenant => vec![origin.clone()],
        TenancyMode::Enterprise => {
            let mut seen = BTreeSet::new();
            enterprise_children
                .into_iter()
                .filter(|tenant_id| seen.insert(tenant_id.clone()))
                .collect()
        }
    }
}

/// Unions each scope's credentials with the enterprise-level ones.
///
/// Scopes that end up with no credential at all are dropped, so an owner
/// without any card yields an empty map.
pub fn aggregate_credentials(
    per_scope: Vec<(TenantId, Vec<CredentialId>)>,
    enterprise_credentials: &[CredentialId],
) -> CredentialMap {
    let mut combined = CredentialMap::new();

    for (tenant_id, credentials) in per_scope {
        combined
            .entry(tenant_id)
            .or_default()
            .extend(credentials);
    }

    for credentials in combined.values_mut() {
        credentials.extend(enterprise_credentials.iter().cloned());
    }

    combined.retain(|_, credentials| !credentials.is_empty());
    combined
}

#[cfg(test)]
mod tests {
    use super::{aggregate_credentials, resolve_tenant_scopes};
    use crate::domain::models::{CredentialId, TenancyMode, TenantId};

    fn tenant(value: &str) -> TenantId {
        TenantId(value.to_string())
    }

    fn card(value: &str) -> CredentialId {
        CredentialId(value.to_string())
    }

    #[test]
    fn single_tenant_searches_only_its_own_scope() {
        let scopes = resolve_tenant_scopes(
            &tenant("t1"),
            TenancyMode::SingleTenant,
            vec![tenant("t2"), tenant("t3")],
        );
        assert_eq!(scopes, vec![tenant("t1")]);
    }

    #[test]
    fn enterprise_searches_every_child_once() {
        let scopes = resolve_tenant_scopes(
            &tenant("t1"),
            TenancyMode::Enterprise,
            vec![tenant("t2"), tenant("t3"), tenant("t2")],
        );
        assert_eq!(scopes, vec![tenant("t2"), tenant("t3")]);
    }

    #[test]
    fn enterprise_without_children_yields_no_scope() {
        let scopes = resolve_tenant_scopes(&tenant("t1"), TenancyMode::Enterprise, Vec::new());
        assert!(scopes.is_empty());
    }

    #[test]
    fn unions_enterprise_cards_into_every_scope_without_duplicates() {
        let combined = aggregate_credentials(
            vec![
                (tenant("t1"), vec![card("A"), card("B"), card("A")]),
                (tenant("t2"), vec![card("C")]),
            ],
            &[card("E"), card("B")],
        );

        let t1: Vec<_> = combined[&tenant("t1")].iter().cloned().collect();
        let t2: Vec<_> = combined[&tenant("t2")].iter().cloned().collect();
        assert_eq!(t1, vec![card("A"), card("B"), card("E")]);
        assert_eq!(t2, vec![card("B"), card("C"), card("E")]);
    }

    #[test]
    fn owner_without_cards_yields_empty_map() {
        let combined =
            aggregate_credentials(vec![(tenant("t1"), Vec::new()), (tenant("t2"), Vec::new())], &[]);
        assert!(combined.is_empty());
    }
}
