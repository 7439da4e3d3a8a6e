//! LED Duel - challenge engine for the LED memory-game device
//!
//! Players build LED sequences and send them as challenges to other players,
//! who reproduce them on the physical device. Points move between the two
//! players according to how much of the sequence was reproduced. Players
//! also collect creatures that evolve as they gain experience.
//!
//! ## Modules
//!
//! - [`scoring`]: deterministic point calculation shared by preview and settlement
//! - [`services::challenges`]: `pending -> accepted -> completed` lifecycle and
//!   the zero-sum point transfer
//! - [`progression`] and [`services::deck`]: capture, experience and evolution
//! - [`store`]: document store trait with memory and sled backends
//! - [`auth`]: email/password accounts and explicit sessions
//!
//! ## Storage Layout
//!
//! ```text
//! users/{userId}              profile and points
//! challenges/{recipientId}    { challenges: [...] } in insertion order
//! deck/{ownerId}_{speciesId}  collected creature
//! captures/{ownerId}_{speciesId}
//! credentials/{email}
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod model;
pub mod progression;
pub mod scoring;
pub mod services;
pub mod store;

pub use auth::{AuthFailure, AuthProvider, AuthResult, RegisterRequest, Session, StoreAuth};
pub use catalog::{Species, SpeciesCatalog, StaticCatalog};
pub use config::{Backend, Config};
pub use error::{DuelError, Result};
pub use model::{Challenge, ChallengeId, ChallengeStatus, DeckEntry, SpeciesId, UserId, UserProfile};
pub use scoring::{final_points, potential_points, FinalPoints, PotentialPoints};
pub use services::{DeviceReport, Services};
pub use store::{DocumentStore, MemoryStore, SledStore};
