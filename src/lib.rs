#![allow(clippy::future_not_send)]

pub mod artifact;
pub mod cli;
pub mod openai;
pub mod prompts;
pub mod runner;
pub mod settings;
