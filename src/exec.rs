use anyhow::{Context, Result};
use crossterm::tty::IsTty;
use std::{
    io::{self, BufRead, BufReader},
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// True when the invocation can attach a terminal to the container.
pub fn stdin_is_tty() -> bool {
    io::stdin().is_tty()
}

/// Keeps the process alive through an interrupt so the container and
/// volume cleanup after the child exits always runs. The child receives
/// the signal through the shared terminal and terminates on its own.
pub fn install_interrupt_guard() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Couldn't install the interrupt handler.")?;
    Ok(interrupted)
}

/// Runs the synthesized engine invocation in the foreground and reports the
/// child's exit code. With a terminal attached all three streams are
/// inherited and the engine handles the interactive plumbing; without one,
/// output is forwarded line by line.
pub fn run_foreground(program: &str, arguments: &[String], interactive: bool) -> Result<i32> {
    if interactive {
        let status = Command::new(program)
            .args(arguments)
            .status()
            .with_context(|| format!("Couldn't execute {}.", program))?;
        return Ok(exit_code(status));
    }

    let mut child = Command::new(program)
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("Couldn't execute {}.", program))?;

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            match line {
                Ok(line) => println!("{}", line),
                Err(_) => break,
            }
        }
    }

    let status = child.wait().context("Couldn't wait on the child process.")?;
    Ok(exit_code(status))
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    status.code().unwrap_or(1)
}

/// Host-side hook commands are whitespace-split and run with inherited
/// stdio; a failing hook is reported but never aborts the invocation.
pub fn run_hook(command_line: &str) -> Result<()> {
    let mut parts = command_line.split_whitespace();
    let program = match parts.next() {
        Some(program) => program,
        None => return Ok(()),
    };

    let status = Command::new(program)
        .args(parts)
        .status()
        .with_context(|| format!("Couldn't execute hook command {:?}.", command_line))?;
    if !status.success() {
        anyhow::bail!("Hook command {:?} exited with {}.", command_line, exit_code(status));
    }
    Ok(())
}
