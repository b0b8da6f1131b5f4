//! Persistence layer for alerts and their child collections.
//!
//! [`store::AlertStore`] wraps a SeaORM connection (SQLite by default) and
//! exposes the machine lookup, the transactional alert writer and the
//! hydrating alert reader. The schema is owned by the `migration` crate and
//! applied when the store is opened.

pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::{MachineLookupError, StorageError};
pub use sea_orm::DbErr;
pub use store::{
    AlertFilter, AlertRow, AlertStore, AlertWithChildren, DecisionRow, EventRow, MachineRow,
    MetaRow, NewMachine,
};
