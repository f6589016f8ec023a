use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{
    parse_created_at, ComputePlatform, ManagedUnit, PlatformError, UnitStatus, CREATED_AT_KEY,
    MANAGED_BY_KEY, MANAGED_BY_VALUE,
};
use crate::models::job::{ComputeJob, ComputeState};

/// Runs worker containers on the local Docker daemon through the `docker` CLI.
/// Meant for development against a Redis queue and a local object store.
pub struct DockerPlatform {
    image: String,
}

const DOCKER_BIN: &str = "docker";

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl DockerPlatform {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
        }
    }

    fn run_args(&self, job: &ComputeJob) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            job.id.clone(),
            "--label".to_string(),
            format!("{}={}", MANAGED_BY_KEY, MANAGED_BY_VALUE),
            "--label".to_string(),
            format!("{}={}", CREATED_AT_KEY, job.submitted_at.to_rfc3339()),
        ];
        for (name, value) in job.descriptor.environment() {
            args.push("-e".to_string());
            args.push(format!("{}={}", name, value));
        }
        args.push(self.image.clone());
        args
    }

    async fn docker(&self, args: &[String]) -> Result<CommandOutput, PlatformError> {
        debug!(command = %args.join(" "), "Running docker");
        let output = Command::new(DOCKER_BIN)
            .args(args)
            .output()
            .await
            .map_err(PlatformError::Io)?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn command_error(&self, args: &[String], output: CommandOutput) -> PlatformError {
        PlatformError::Command {
            command: format!("{} {}", DOCKER_BIN, args.join(" ")),
            stderr: output.stderr,
        }
    }
}

fn is_missing(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such object") || stderr.contains("no such container")
}

/// Parse `docker inspect --format '{{.State.Status}} {{.State.ExitCode}}'`.
fn parse_inspect_state(line: &str) -> Result<UnitStatus, PlatformError> {
    let mut parts = line.split_whitespace();
    let status = parts
        .next()
        .ok_or_else(|| PlatformError::Parse("empty docker inspect output".to_string()))?;
    let exit_code = parts.next().and_then(|code| code.parse().ok());

    let state = match status {
        "created" => ComputeState::Submitting,
        "running" | "restarting" | "paused" | "removing" => ComputeState::Running,
        "exited" | "dead" => ComputeState::Terminated,
        other => {
            return Err(PlatformError::Parse(format!(
                "unknown container status {:?}",
                other
            )))
        }
    };

    let exit_code = if state == ComputeState::Terminated {
        exit_code
    } else {
        None
    };
    Ok(UnitStatus::Present { state, exit_code })
}

/// Parse `docker ps --format '{{.Names}}\t{{.Label "created-at"}}'` output.
fn parse_ps_lines(output: &str) -> Vec<ManagedUnit> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.splitn(2, '\t');
            let name = fields.next().unwrap_or_default().trim().to_string();
            let created_at = parse_created_at(fields.next().map(str::trim));
            ManagedUnit { name, created_at }
        })
        .collect()
}

#[async_trait]
impl ComputePlatform for DockerPlatform {
    async fn create(&self, job: &ComputeJob) -> Result<(), PlatformError> {
        let args = self.run_args(job);
        let output = self.docker(&args).await?;
        if !output.success {
            return Err(self.command_error(&args, output));
        }
        debug!(job_id = %job.id, container = %output.stdout, "Container started");
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<UnitStatus, PlatformError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}} {{.State.ExitCode}}".to_string(),
            name.to_string(),
        ];
        let output = self.docker(&args).await?;
        if !output.success {
            if is_missing(&output.stderr) {
                return Ok(UnitStatus::Absent);
            }
            return Err(self.command_error(&args, output));
        }
        parse_inspect_state(&output.stdout)
    }

    async fn delete(&self, name: &str) -> Result<(), PlatformError> {
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        let output = self.docker(&args).await?;
        if output.success || is_missing(&output.stderr) {
            Ok(())
        } else {
            Err(self.command_error(&args, output))
        }
    }

    async fn list_managed(&self) -> Result<Vec<ManagedUnit>, PlatformError> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={}={}", MANAGED_BY_KEY, MANAGED_BY_VALUE),
            "--format".to_string(),
            format!("{{{{.Names}}}}\t{{{{.Label \"{}\"}}}}", CREATED_AT_KEY),
        ];
        let output = self.docker(&args).await?;
        if !output.success {
            return Err(self.command_error(&args, output));
        }
        Ok(parse_ps_lines(&output.stdout))
    }
}
