pub mod compactor;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod inventory;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wire;
