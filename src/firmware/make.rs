//! [`FirmwareTool`] backed by RIOT's make-based build system.

use super::{AttachMode, FirmwareError, FirmwareTarget, FirmwareTool};
use crate::term::{ProcessTransport, SerialTransport, Transport};
use std::process::{Command, Output};
use tracing::{debug, info};

/// Lines of tool output kept in build/flash errors.
const OUTPUT_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct MakeFirmware {
    program: String,
    attach: AttachMode,
    serial_baud: u32,
}

impl MakeFirmware {
    pub fn new(program: impl Into<String>, attach: AttachMode, serial_baud: u32) -> Self {
        Self {
            program: program.into(),
            attach,
            serial_baud,
        }
    }

    fn command(&self, target: &FirmwareTarget, make_target: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-C")
            .arg(&target.app_dir)
            .arg(make_target)
            .env("BOARD", &target.board)
            .envs(&target.env);
        command
    }

    fn run(&self, target: &FirmwareTarget, make_target: &str) -> Result<Output, FirmwareError> {
        debug!(node = %target.node, "{} -C {} {make_target}", self.program, target.app_dir.display());
        self.command(target, make_target)
            .output()
            .map_err(|source| FirmwareError::Spawn {
                program: self.program.clone(),
                source,
            })
    }
}

impl Default for MakeFirmware {
    fn default() -> Self {
        Self::new("make", AttachMode::MakeTerm, 115_200)
    }
}

fn output_tail(output: &Output) -> String {
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(OUTPUT_TAIL)..].join("\n")
}

impl FirmwareTool for MakeFirmware {
    fn build(&self, target: &FirmwareTarget) -> Result<(), FirmwareError> {
        info!(node = %target.node, board = %target.board, app = %target.app_name(), "building");
        let output = self.run(target, "all")?;
        if !output.status.success() {
            return Err(FirmwareError::Build {
                node: target.node.clone(),
                board: target.board.clone(),
                app: target.app_name(),
                code: output.status.code(),
                output: output_tail(&output),
            });
        }
        Ok(())
    }

    fn flash(&self, target: &FirmwareTarget) -> Result<(), FirmwareError> {
        info!(node = %target.node, board = %target.board, "flashing");
        let output = self.run(target, "flash-only")?;
        if !output.status.success() {
            return Err(FirmwareError::Flash {
                node: target.node.clone(),
                board: target.board.clone(),
                app: target.app_name(),
                code: output.status.code(),
                output: output_tail(&output),
            });
        }
        Ok(())
    }

    fn attach(&self, target: &FirmwareTarget) -> Result<Box<dyn Transport>, FirmwareError> {
        info!(node = %target.node, mode = ?self.attach, "attaching terminal");
        let terminal_error = |reason: String| FirmwareError::Terminal {
            node: target.node.clone(),
            reason,
        };
        match self.attach {
            AttachMode::MakeTerm => {
                let transport = ProcessTransport::spawn(&target.node, self.command(target, "term"))
                    .map_err(|e| terminal_error(e.to_string()))?;
                Ok(Box::new(transport))
            }
            AttachMode::Serial => {
                let port = target
                    .env
                    .get("PORT")
                    .ok_or_else(|| terminal_error("PORT is not set".to_string()))?;
                let transport = SerialTransport::open(port, self.serial_baud)
                    .map_err(|e| terminal_error(e.to_string()))?;
                Ok(Box::new(transport))
            }
        }
    }
}
