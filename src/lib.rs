pub mod api_router;
pub mod audit;
pub mod config;
pub mod escalation;
pub mod shared;
pub mod sla;
pub mod tasks;
pub mod tickets;
