pub mod controller;
pub mod cost;
pub mod executor;
pub mod reconcile;
pub mod selector;
