// ABOUTME: Terminal prompter for interactive authentication.
// ABOUTME: Lets the operator pick password, key file or agent using dialoguer.

use super::auth::{PromptAnswer, Prompter};
use crate::config::ConnectionTarget;
use dialoguer::{Input, Password, Select};
use std::io;
use std::path::PathBuf;

/// Prompts on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&self, target: &ConnectionTarget) -> io::Result<PromptAnswer> {
        eprintln!("Connecting to {}", target.display_name());

        let choice = Select::new()
            .with_prompt("Authentication method")
            .items(&["Password", "Key file", "SSH agent"])
            .default(0)
            .interact()
            .map_err(io::Error::other)?;

        match choice {
            0 => {
                let password = Password::new()
                    .with_prompt("Password")
                    .interact()
                    .map_err(io::Error::other)?;
                Ok(PromptAnswer::Password(password))
            }
            1 => {
                let path: String = Input::new()
                    .with_prompt("Key file path")
                    .interact_text()
                    .map_err(io::Error::other)?;
                let path = PathBuf::from(path.trim());

                // Only ask for a passphrase when the key cannot be read without one.
                let passphrase = match russh::keys::load_secret_key(&path, None) {
                    Ok(_) => None,
                    Err(_) => Some(
                        Password::new()
                            .with_prompt("Key passphrase")
                            .allow_empty_password(true)
                            .interact()
                            .map_err(io::Error::other)?,
                    )
                    .filter(|p| !p.is_empty()),
                };
                Ok(PromptAnswer::KeyFile { path, passphrase })
            }
            _ => Ok(PromptAnswer::Agent),
        }
    }
}
