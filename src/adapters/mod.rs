pub mod api;
pub mod charger_control;
pub mod db;
pub mod live;
pub mod push;
