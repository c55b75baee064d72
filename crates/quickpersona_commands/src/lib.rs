pub mod parser;
pub mod plugin;
pub mod profile_commands;
pub mod reply;
pub mod service;
pub mod workshop;

pub use parser::{parse, parse_message, Command, ProfileCommand};
pub use plugin::QuickPersona;
pub use profile_commands::ProfileCommands;
pub use reply::{Card, Reply};
pub use service::{Activation, PersonaError, PersonaService};
pub use workshop::{Draft, GuidedRequest, PersonaWorkshop};
