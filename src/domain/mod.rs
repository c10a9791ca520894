pub mod billing;
pub mod clock;
pub mod cutoff;
pub mod metering;
pub mod models;
pub mod notification;
pub mod tenancy;
