//! tmpmail - disposable mailboxes with automatic link extraction
//!
//! This crate provisions temporary email accounts across several public
//! disposable-mail services, watches them for incoming messages, and acts on
//! the links those messages contain.

pub mod cli;
pub mod config;
pub mod domain;
pub mod extract;
pub mod providers;
pub mod services;
pub mod storage;
