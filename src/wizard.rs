//! Interactive config file creation
//!
//! Walks the settings table, asks for each value, and writes a config file
//! the interpreter accepts.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use zeroize::Zeroizing;

use crate::process::disable_echo;
use crate::settings::{check_value, SettingSpec, SettingType, SETTINGS};

/// Longest answer accepted, in bytes
pub const MAX_ANSWER_LENGTH: usize = 389;

/// Prompts on `output` and reads answers from `input`
pub struct Wizard<R, W> {
    input: R,
    output: W,
    /// Whether `input` is the terminal, so password echo can be switched off
    terminal: bool,
}

impl<R: BufRead, W: Write> Wizard<R, W> {
    pub fn new(input: R, output: W, terminal: bool) -> Self {
        Self {
            input,
            output,
            terminal,
        }
    }

    /// Asks for one setting until a valid answer is given
    ///
    /// An empty answer takes the default.
    pub fn ask(&mut self, spec: &SettingSpec) -> Result<Zeroizing<String>> {
        self.prompt(
            spec.description,
            spec.default,
            spec.kind,
            spec.name == "password",
        )
    }

    /// Asks where the config file should be created
    pub fn ask_location(&mut self, default: &Path) -> Result<PathBuf> {
        let default = default.display().to_string();
        let answer = self.prompt("Create where?", &default, SettingType::String, false)?;
        Ok(PathBuf::from(answer.as_str()))
    }

    fn prompt(
        &mut self,
        description: &str,
        default: &str,
        kind: SettingType,
        secret: bool,
    ) -> Result<Zeroizing<String>> {
        loop {
            writeln!(self.output, "{}", description)?;
            write!(self.output, "Ans [{}]: ", default)?;
            self.output.flush()?;

            let mut line = Zeroizing::new(String::new());
            let read = {
                let _echo = if secret && self.terminal {
                    disable_echo().context("toggle echo")?
                } else {
                    None
                };
                self.input.read_line(&mut line)
            };
            if secret {
                writeln!(self.output)?;
            }

            if read.context("read answer")? == 0 {
                return Err(anyhow!("input closed before all settings were answered"));
            }

            let answer = line.trim_end_matches(['\r', '\n']);
            if answer.len() > MAX_ANSWER_LENGTH {
                writeln!(
                    self.output,
                    "Input too big (max {} characters), try again.",
                    MAX_ANSWER_LENGTH
                )?;
                continue;
            }

            let answer = if answer.is_empty() { default } else { answer };
            match check_value(kind, answer) {
                Ok(()) => return Ok(Zeroizing::new(answer.to_string())),
                Err(reason) => writeln!(self.output, "Invalid answer: {}, try again.", reason)?,
            }
        }
    }

    /// Asks for every setting and renders the config file text
    pub fn collect(&mut self) -> Result<Zeroizing<String>> {
        let mut content = Zeroizing::new(String::new());
        for spec in SETTINGS {
            let answer = self.ask(spec)?;
            writeln!(content, "{} = \"{}\";", spec.name, answer.as_str())?;
        }
        Ok(content)
    }
}

/// Runs the wizard and writes the answers to `path`
///
/// # Errors
///
/// - `path` already exists
/// - the answers cannot be read
/// - the file cannot be written
pub fn write_config<R: BufRead, W: Write>(path: &Path, wizard: &mut Wizard<R, W>) -> Result<()> {
    if path.exists() {
        return Err(anyhow!(
            "can't create config file {}: it already exists",
            path.display()
        ));
    }

    let content = wizard.collect()?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to create config: {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("chmod {}", path.display()))?;

    Ok(())
}

/// Creates a config file interactively on the terminal
///
/// The location is asked first, offering `default_path`.
pub fn create_config_file(default_path: &Path) -> Result<()> {
    let stdin = io::stdin();
    let mut wizard = Wizard::new(stdin.lock(), io::stdout(), true);
    let path = wizard.ask_location(default_path)?;
    write_config(&path, &mut wizard)?;
    println!("{} successfully written!", path.display());
    Ok(())
}

//==============================================================================
// Tests
//==============================================================================
