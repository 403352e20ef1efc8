//! # thingshadow credentials
//!
//! Temporary AWS credentials for devices, obtained from the AWS IoT
//! credentials provider by presenting the device's X.509 certificate.
//!
//! ```rust,ignore
//! use thingshadow_credentials::{CredentialsConfig, CredentialsProvider};
//!
//! let config = CredentialsConfig::new(
//!     "https://<endpoint>/role-aliases/<alias>/credentials",
//!     thing_name,
//!     "cert.pem",
//!     "private.key",
//! );
//! let credentials = CredentialsProvider::new(&config)?.fetch().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod credentials;
mod error;
mod provider;

pub use config::{CredentialsConfig, THING_NAME_HEADER};
pub use credentials::Credentials;
pub use error::{CredentialsError, CredentialsResult};
pub use provider::CredentialsProvider;
