pub mod backoff;
pub mod context;
pub mod engine;
pub mod hierarchy;
pub mod ledger;
pub mod paths;
pub mod planner;
pub mod upload;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;
