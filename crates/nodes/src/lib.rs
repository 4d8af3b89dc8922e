//! `nodes` crate — the step contract, the step registry and built-in steps.
//!
//! Every step type, built-in or connector, implements [`Step`] and is
//! registered once, at startup, in a [`StepRegistry`]. The engine crate
//! validates node configuration against the registry's declared inputs and
//! dispatches execution through the `Step` trait object.

pub mod error;
pub mod traits;
pub mod registry;
pub mod builtin;
pub mod mock;

pub use builtin::{register_builtins, EchoStep};
pub use error::NodeError;
pub use registry::{InputField, StepDescriptor, StepRegistry, StepRegistryBuilder};
pub use traits::{
    credentials_not_configured, CredentialsProvider, NoCredentials, RuntimeContext,
    StaticCredentials, Step, StepInput, StepResult,
};
