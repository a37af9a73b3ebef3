//! Common utilities and types shared across Token Guard components.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (bearer extraction, structural parsing, claims, constants)
pub mod jwt;
