//! Optional upstream hub integration
//!
//! When a hub URL is configured the orchestrator advertises its devices and
//! apps as a grid node and re-registers whenever the hub forgets it.

pub mod client;
pub mod registrar;

pub use client::{HubClient, HubClientConfig, HubError, RegistrationRequest, REGISTRATION_CLASS};
pub use registrar::{HubRegistrar, RegistrarSettings, RegistrarState};
