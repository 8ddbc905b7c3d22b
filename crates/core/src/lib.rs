//! Core types for Portex
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error taxonomy and `Result` alias
//! - Value: Dynamically-typed cell and row values
//! - FileRef / ObjectStorage: Binary cells and the storage collaborator
//! - SchemaType: The Portex type system, canonical trees and templates
//! - PackageRegistry: Session-owned template packages keyed by (repository, revision)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod file;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use file::{checksum, FileRef, LocalFile, ObjectStorage, RemoteFile};
pub use schema::{
    ArrayType, EnumType, Field, Import, Package, PackageRef, PackageRegistry, PackageSource,
    Parameter, PrimitiveKind, PrimitiveType, RecordType, SchemaType, Template, TemplateId,
    TemplateInstance, TensorType, TypeResolver,
};
pub use value::Value;
