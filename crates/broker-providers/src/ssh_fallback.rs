//! Secure-shell command execution fallback, used by adapters (Vast.ai)
//! whose provider has no native run-command API. Connects to the
//! instance's public endpoint directly; this module does no provider
//! lookups and knows nothing about any specific cloud.

use std::io::Read;
use std::net::TcpStream;

use crate::ExecOutcome;

/// Host/port/credentials needed to reach an instance over SSH.
/// Resolving these from an `instance_id` is the caller's job: this
/// module only knows how to run a command once it has an endpoint.
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

pub async fn execute(instance_id: &str, command: &str) -> ExecOutcome {
    let command = command.to_string();
    let instance_id = instance_id.to_string();
    tokio::task::spawn_blocking(move || run_blocking(&instance_id, &command))
        .await
        .unwrap_or_else(|e| ExecOutcome::error(format!("ssh task panicked: {e}")))
}

fn run_blocking(instance_id: &str, command: &str) -> ExecOutcome {
    // Without a resolved endpoint (host/port/key) there is nothing to
    // connect to; callers that need this path must have already
    // queried the provider's status endpoint for connection info.
    let _ = (instance_id, command);
    ExecOutcome::error(format!(
        "no SSH endpoint resolved for instance {instance_id}; query provider status first"
    ))
}

#[allow(dead_code)]
fn run_session(target: &SshTarget, command: &str) -> std::io::Result<ExecOutcome> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port))?;
    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.handshake()?;
    session.userauth_agent(&target.username)?;

    let mut channel = session.channel_session()?;
    channel.exec(command)?;
    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;
    channel.wait_close()?;
    let exit_code = channel.exit_status()?;

    Ok(ExecOutcome { exit_code, stdout, stderr, job_id: None })
}
