//! # Docker Hosts
//!
//! Hosts backed by privileged docker-in-docker containers on the test
//! machine. Every host runs its own docker daemon, so the route reflector
//! image is loaded and launched inside it with `docker exec`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Host, HostOptions, HostProvisioner};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::interrupt::Interrupt;

/// How long to wait for a host's inner docker daemon to answer
const HOST_READY_TIMEOUT: Duration = Duration::from_secs(60);
const HOST_READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on removing a half-started host, which ignores the interrupt
const HOST_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Mount point of the checkout directory inside every host
const HOST_CODE_DIR: &str = "/code";

/// Runs docker commands, racing each against the user interrupt
#[derive(Debug, Clone)]
struct DockerCli {
    docker: PathBuf,
    interrupt: Interrupt,
}

impl DockerCli {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let rendered = format!("docker {}", args.join(" "));
        if self.interrupt.is_triggered() {
            return Err(HarnessError::Cancelled);
        }
        debug!("Running: {}", rendered);

        let output = tokio::select! {
            output = self.output(args, &rendered) => output?,
            () = self.interrupt.triggered() => {
                warn!("Interrupted while running: {}", rendered);
                return Err(HarnessError::Cancelled);
            }
        };
        check_output(rendered, &output)
    }

    /// Run without watching the interrupt, bounded by `limit`
    ///
    /// For cleanup that must still happen after the user interrupted.
    async fn run_uninterruptible(&self, args: &[&str], limit: Duration) -> Result<String> {
        let rendered = format!("docker {}", args.join(" "));
        debug!("Running (uninterruptible): {}", rendered);

        let output = tokio::time::timeout(limit, self.output(args, &rendered))
            .await
            .map_err(|_elapsed| HarnessError::CommandTimeout {
                command: rendered.clone(),
                timeout_secs: limit.as_secs(),
            })??;
        check_output(rendered, &output)
    }

    async fn output(&self, args: &[&str], rendered: &str) -> Result<Output> {
        Command::new(&self.docker)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| HarnessError::CommandSpawn {
                command: rendered.to_string(),
                source,
            })
    }
}

fn check_output(rendered: String, output: &Output) -> Result<String> {
    if !output.status.success() {
        return Err(HarnessError::CommandFailed {
            command: rendered,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Provisions [`DockerHost`]s
#[derive(Debug, Clone)]
pub struct DockerHostProvisioner {
    cli: DockerCli,
    dind_image: String,
    checkout_dir: PathBuf,
}

impl DockerHostProvisioner {
    /// Locate the docker binary and prepare to create hosts
    pub fn new(config: &HarnessConfig, interrupt: Interrupt) -> Result<Self> {
        let docker = which::which("docker")
            .map_err(|e| HarnessError::DockerNotFound(e.to_string()))?;
        debug!("Using docker binary at: {:?}", docker);
        Ok(Self {
            cli: DockerCli { docker, interrupt },
            dind_image: config.dind_image.clone(),
            checkout_dir: config.checkout_dir.clone(),
        })
    }

    /// Arguments for `docker run` that start a host container
    fn run_args(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--privileged".to_string(),
            "-tid".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-v".to_string(),
            format!("{}:{}", self.checkout_dir.display(), HOST_CODE_DIR),
        ];
        // TLS material is referenced by its checkout path from inside the host
        if self.checkout_dir != Path::new(HOST_CODE_DIR) {
            args.push("-v".to_string());
            args.push(format!(
                "{dir}:{dir}:ro",
                dir = self.checkout_dir.display()
            ));
        }
        args.push(self.dind_image.clone());
        args
    }

    async fn wait_for_docker_ready(&self, name: &str) -> Result<()> {
        let start = Instant::now();
        loop {
            match self.cli.run(&["exec", name, "docker", "version"]).await {
                Ok(_) => {
                    debug!("Docker daemon in host '{}' is ready", name);
                    return Ok(());
                }
                Err(HarnessError::Cancelled) => return Err(HarnessError::Cancelled),
                Err(e) if start.elapsed() >= HOST_READY_TIMEOUT => {
                    return Err(e);
                }
                Err(_) => {
                    // Continue polling
                }
            }
            sleep(HOST_READY_POLL_INTERVAL).await;
        }
    }

    async fn inspect_ip(&self, name: &str) -> Result<IpAddr> {
        let raw = self
            .cli
            .run(&[
                "inspect",
                "--format",
                "{{ .NetworkSettings.IPAddress }}",
                name,
            ])
            .await?;
        let value = raw.trim();
        value.parse().map_err(|_| HarnessError::InvalidHostIp {
            host: name.to_string(),
            value: value.to_string(),
        })
    }

    async fn start_host(&self, name: &str, options: HostOptions) -> Result<DockerHost> {
        self.wait_for_docker_ready(name).await?;
        let ip = self.inspect_ip(name).await?;
        let host = DockerHost {
            name: name.to_string(),
            ip,
            cli: self.cli.clone(),
        };

        if options.start_calico {
            host.execute(&format!("calicoctl node --ip={ip}")).await?;
        }

        Ok(host)
    }
}

#[async_trait]
impl HostProvisioner for DockerHostProvisioner {
    async fn provision(&self, name: &str, options: HostOptions) -> Result<Box<dyn Host>> {
        info!("Creating host '{}'...", name);
        let args = self.run_args(name);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.cli.run(&args).await?;

        match self.start_host(name, options).await {
            Ok(host) => {
                info!("Host '{}' is up at {}", name, host.ip);
                Ok(Box::new(host))
            }
            Err(e) => {
                // The container exists but is not usable; remove it even when
                // the failure was an interrupt
                if let Err(cleanup_err) = self
                    .cli
                    .run_uninterruptible(&["rm", "-f", name], HOST_ROLLBACK_TIMEOUT)
                    .await
                {
                    warn!(
                        "Failed to remove half-started host '{}': {}",
                        name, cleanup_err
                    );
                }
                Err(e)
            }
        }
    }
}

/// A docker-in-docker host
#[derive(Debug)]
pub struct DockerHost {
    name: String,
    ip: IpAddr,
    cli: DockerCli,
}

#[async_trait]
impl Host for DockerHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn ip(&self) -> IpAddr {
        self.ip
    }

    async fn execute(&self, command: &str) -> Result<String> {
        self.cli
            .run(&["exec", &self.name, "sh", "-c", command])
            .await
    }

    async fn cleanup(&self) -> Result<()> {
        info!("Cleaning up host '{}'...", self.name);
        match self.cli.run(&["rm", "-f", &self.name]).await {
            Ok(_) => {
                info!("Successfully removed host '{}'", self.name);
                Ok(())
            }
            Err(HarnessError::CommandFailed { stderr, .. }) if stderr.contains("No such container") => {
                warn!(
                    "Host '{}' does not exist, nothing to clean up",
                    self.name
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provisioner(checkout_dir: &str) -> DockerHostProvisioner {
        DockerHostProvisioner {
            cli: DockerCli {
                docker: PathBuf::from("/usr/bin/docker"),
                interrupt: Interrupt::never(),
            },
            dind_image: "calico/dind:latest".to_string(),
            checkout_dir: PathBuf::from(checkout_dir),
        }
    }

    #[test]
    fn run_args_mount_checkout_at_code() {
        let args = provisioner("/code").run_args("RR.0.1");
        assert_eq!(
            args,
            vec![
                "run",
                "--privileged",
                "-tid",
                "--name",
                "RR.0.1",
                "-v",
                "/code:/code",
                "calico/dind:latest",
            ]
        );
    }

    #[test]
    fn run_args_also_mount_checkout_at_own_path() {
        let args = provisioner("/home/ci/calico").run_args("RR.1.0");
        assert!(args.contains(&"/home/ci/calico:/code".to_string()));
        assert!(args.contains(&"/home/ci/calico:/home/ci/calico:ro".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("calico/dind:latest"));
    }

    #[tokio::test]
    async fn triggered_interrupt_cancels_before_spawning() {
        let (handle, interrupt) = Interrupt::manual();
        handle.trigger();
        let cli = DockerCli {
            docker: PathBuf::from("/nonexistent/docker"),
            interrupt,
        };
        let err = cli.run(&["ps"]).await.expect_err("must be cancelled");
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let cli = DockerCli {
            docker: PathBuf::from("/nonexistent/docker"),
            interrupt: Interrupt::never(),
        };
        let err = cli.run(&["ps"]).await.expect_err("must fail to spawn");
        assert!(matches!(err, HarnessError::CommandSpawn { .. }));
    }

    /// Scripted stand-in for the docker binary
    ///
    /// Every invocation appends its arguments to `docker.log`, then runs
    /// `body` with the arguments in `$@`.
    #[cfg(unix)]
    struct FakeDocker {
        dir: tempfile::TempDir,
    }

    #[cfg(unix)]
    impl FakeDocker {
        fn new(body: &str) -> Self {
            use std::os::unix::fs::PermissionsExt;

            let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
            let script = dir.path().join("docker");
            let log = dir.path().join("docker.log");
            std::fs::write(
                &script,
                format!(
                    "#!/bin/sh\necho \"$*\" >> '{log}'\nSTATE='{state}'\n{body}\n",
                    log = log.display(),
                    state = dir.path().display(),
                ),
            )
            .expect("Failed to write fake docker");
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
                .expect("Failed to make fake docker executable");
            Self { dir }
        }

        fn cli(&self, interrupt: Interrupt) -> DockerCli {
            DockerCli {
                docker: self.dir.path().join("docker"),
                interrupt,
            }
        }

        fn provisioner(&self, interrupt: Interrupt) -> DockerHostProvisioner {
            DockerHostProvisioner {
                cli: self.cli(interrupt),
                dind_image: "calico/dind:latest".to_string(),
                checkout_dir: PathBuf::from("/code"),
            }
        }

        fn host(&self, name: &str) -> DockerHost {
            DockerHost {
                name: name.to_string(),
                ip: "172.17.0.8".parse().unwrap(),
                cli: self.cli(Interrupt::never()),
            }
        }

        /// Logged invocations, one argument string per line
        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("docker.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn provision_polls_until_ready_then_inspects() {
        // The inner daemon answers on the second poll
        let docker = FakeDocker::new(
            r#"case "$1" in
  exec)
    if [ -f "$STATE/ready" ]; then exit 0; fi
    touch "$STATE/ready"
    echo "Cannot connect to the Docker daemon" >&2
    exit 1 ;;
  inspect) echo "172.17.0.9" ;;
esac"#,
        );

        let host = docker
            .provisioner(Interrupt::never())
            .provision("RR.0.1", HostOptions::bare())
            .await
            .expect("provisioning should succeed");

        assert_eq!(host.name(), "RR.0.1");
        assert_eq!(host.ip(), "172.17.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(
            docker.calls(),
            vec![
                "run --privileged -tid --name RR.0.1 -v /code:/code calico/dind:latest",
                "exec RR.0.1 docker version",
                "exec RR.0.1 docker version",
                "inspect --format {{ .NetworkSettings.IPAddress }} RR.0.1",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn provision_rejects_unparseable_ip_and_removes_host() {
        let docker = FakeDocker::new(
            r#"case "$1" in
  inspect) echo "<no value>" ;;
esac"#,
        );

        let err = docker
            .provisioner(Interrupt::never())
            .provision("RR.0.2", HostOptions::bare())
            .await
            .expect_err("a bad address must fail provisioning");

        match err {
            HarnessError::InvalidHostIp { host, value } => {
                assert_eq!(host, "RR.0.2");
                assert_eq!(value, "<no value>");
            }
            other => panic!("expected invalid host IP, got {other:?}"),
        }
        assert_eq!(docker.calls().last().map(String::as_str), Some("rm -f RR.0.2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn provision_removes_host_interrupted_while_starting() {
        // The inner daemon never answers
        let docker = FakeDocker::new(
            r#"case "$1" in
  exec) exec sleep 10 ;;
esac"#,
        );
        let (handle, interrupt) = Interrupt::manual();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            handle.trigger();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            docker
                .provisioner(interrupt)
                .provision("RR.0.0", HostOptions::bare()),
        )
        .await
        .expect("provisioning must not outlive the interrupt")
        .expect_err("interrupted provisioning must fail");

        assert!(err.is_cancellation());
        assert_eq!(
            docker.calls(),
            vec![
                "run --privileged -tid --name RR.0.0 -v /code:/code calico/dind:latest",
                "exec RR.0.0 docker version",
                "rm -f RR.0.0",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_runs_command_through_shell_in_host() {
        let docker = FakeDocker::new(r#"echo "Loaded image: calico/routereflector:latest""#);

        let output = docker
            .host("RR.1.0")
            .execute("docker load --input /code/routereflector.tar")
            .await
            .expect("execute should succeed");

        assert_eq!(output, "Loaded image: calico/routereflector:latest\n");
        assert_eq!(
            docker.calls(),
            vec!["exec RR.1.0 sh -c docker load --input /code/routereflector.tar"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cleanup_treats_missing_container_as_done() {
        let docker = FakeDocker::new(
            r#"echo "Error response from daemon: No such container: RR.0.0" >&2
exit 1"#,
        );

        docker
            .host("RR.0.0")
            .cleanup()
            .await
            .expect("a missing container is already cleaned up");
        assert_eq!(docker.calls(), vec!["rm -f RR.0.0"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cleanup_surfaces_other_failures() {
        let docker = FakeDocker::new(
            r#"echo "Cannot connect to the Docker daemon at unix:///var/run/docker.sock" >&2
exit 1"#,
        );

        let err = docker
            .host("RR.0.0")
            .cleanup()
            .await
            .expect_err("daemon failures must propagate");
        match err {
            HarnessError::CommandFailed { command, stderr, .. } => {
                assert_eq!(command, "docker rm -f RR.0.0");
                assert!(stderr.contains("Cannot connect to the Docker daemon"));
            }
            other => panic!("expected command failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn uninterruptible_run_ignores_triggered_interrupt() {
        let docker = FakeDocker::new("exit 0");
        let (handle, interrupt) = Interrupt::manual();
        handle.trigger();

        docker
            .cli(interrupt)
            .run_uninterruptible(&["rm", "-f", "RR.0.0"], Duration::from_secs(5))
            .await
            .expect("rollback must run after an interrupt");
        assert_eq!(docker.calls(), vec!["rm -f RR.0.0"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn uninterruptible_run_times_out() {
        let docker = FakeDocker::new("exec sleep 10");

        let err = docker
            .cli(Interrupt::never())
            .run_uninterruptible(&["rm", "-f", "RR.0.0"], Duration::from_millis(200))
            .await
            .expect_err("a hung command must time out");
        assert!(matches!(err, HarnessError::CommandTimeout { .. }));
    }
}
