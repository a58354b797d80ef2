pub mod clear;
pub mod completions;
pub mod saml;
pub mod specific;

pub use clear::ClearCommand;
pub use completions::CompletionsCommand;
pub use saml::SamlCommand;
pub use specific::SpecificCommand;
