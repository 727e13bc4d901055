//! Translation backends.
//!
//! Adding a backend means one new module here plus a registry entry in the
//! composition root; nothing else changes.

mod deepl;
mod google;
mod libretranslate;
mod ollama;
mod openai;

pub use deepl::{DeepLBackend, DeepLConfig};
pub use google::{GoogleTranslateBackend, GoogleTranslateConfig};
pub use libretranslate::{LibreTranslateBackend, LibreTranslateConfig};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use openai::{OpenAiBackend, OpenAiConfig};
