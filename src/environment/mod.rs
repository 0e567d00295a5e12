//! Software Environment Helpers
//!
//! Turns conda package lists into container and software requirements
//! for tools.

pub mod container;

pub use container::{
    container_requirement, dockerfile_from_packages, provision, software_requirement, PackageSpec,
    BASE_IMAGE, CHANNELS,
};
