use crate::{Driver, DriverError, Instance, Result, RunSpec};
use async_trait::async_trait;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// Drives `docker` or `podman` through their (interchangeable) CLIs.
///
/// Container names are prefixed with the namespace, so several simulations
/// can share a host and `cleanup` only sweeps its own containers.
pub struct CliDriver {
    binary: String,
    namespace: String,
}

impl CliDriver {
    pub fn docker(namespace: impl Into<String>) -> Self {
        Self::new("docker", namespace)
    }

    pub fn podman(namespace: impl Into<String>) -> Self {
        Self::new("podman", namespace)
    }

    pub fn new(binary: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            namespace: namespace.into(),
        }
    }

    fn scoped(&self, name: &str) -> String {
        format!("{}-{}", self.namespace, name)
    }

    async fn exec(&self, args: &[String]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "runtime command");
        let output = Command::new(&self.binary).args(args).output().await?;
        if !output.status.success() {
            return Err(DriverError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn exec_stdout(&self, args: &[String]) -> Result<String> {
        let output = self.exec(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Argument list for `run`, split out so the flag assembly is testable.
fn run_args(name: &str, spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
    ];
    for (container, host) in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{host}:{container}"));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    if spec.cpus > 0.0 {
        args.push("--cpus".to_string());
        args.push(spec.cpus.to_string());
    }
    if spec.memory_mb > 0 {
        args.push("--memory".to_string());
        args.push(format!("{}m", spec.memory_mb));
    }
    args.push(spec.image.clone());
    args
}

#[async_trait]
impl Driver for CliDriver {
    async fn has_image(&self, image: &str) -> Result<bool> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            image.to_string(),
        ];
        match self.exec(&args).await {
            Ok(_) => Ok(true),
            Err(DriverError::CommandFailed { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn build(&self, image: &str, context: &Path) -> Result<()> {
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            context.display().to_string(),
        ];
        self.exec(&args).await?;
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let args = vec!["pull".to_string(), image.to_string()];
        self.exec(&args).await?;
        Ok(())
    }

    async fn run(&self, name: &str, spec: RunSpec) -> Result<Instance> {
        let scoped = self.scoped(name);
        self.exec(&run_args(&scoped, &spec)).await?;

        // The internal address lets containers reach each other directly
        // without going through published host ports.
        let inspect = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}".to_string(),
            scoped.clone(),
        ];
        let address = self.exec_stdout(&inspect).await?;
        if address.is_empty() {
            return Err(DriverError::Malformed(format!(
                "no network address reported for {scoped}"
            )));
        }

        Ok(Instance {
            address,
            ports: spec.ports.iter().map(|(c, h)| (*c, *h)).collect(),
        })
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let args = vec![
            "rm".to_string(),
            "-f".to_string(),
            self.scoped(name),
        ];
        self.exec(&args).await?;
        Ok(())
    }

    async fn upload(&self, name: &str, local: &Path, remote: &str) -> Result<()> {
        let args = vec![
            "cp".to_string(),
            local.display().to_string(),
            format!("{}:{}", self.scoped(name), remote),
        ];
        self.exec(&args).await?;
        Ok(())
    }

    async fn download(&self, name: &str, remote: &str, local: &Path) -> Result<()> {
        let args = vec![
            "cp".to_string(),
            format!("{}:{}", self.scoped(name), remote),
            local.display().to_string(),
        ];
        self.exec(&args).await?;
        Ok(())
    }

    async fn peek(&self, name: &str, remote: &str) -> Result<Vec<u8>> {
        let args = vec![
            "exec".to_string(),
            self.scoped(name),
            "cat".to_string(),
            remote.to_string(),
        ];
        let output = self.exec(&args).await?;
        Ok(output.stdout)
    }

    async fn cleanup(&self) -> Result<()> {
        let list = vec![
            "ps".to_string(),
            "-aq".to_string(),
            "--filter".to_string(),
            format!("name=^{}-", self.namespace),
        ];
        let ids = self.exec_stdout(&list).await?;
        let ids: Vec<String> = ids.split_whitespace().map(str::to_string).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(ids);
        self.exec(&args).await?;
        Ok(())
    }
}
