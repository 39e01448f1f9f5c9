use anyhow::Context;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Run a command from an array in `dir`, collecting its trimmed stdout.
/// Fails if the program cannot be spawned or exits unsuccessfully.
pub fn run_command_at<'a, Args: AsRef<[&'a str]>>(args: Args, dir: &Path) -> anyhow::Result<String> {
    run_command_with_env(args, dir, &[])
}

/// [`run_command_at`] with extra environment for the child. The environment is
/// never logged, so it may carry secrets.
pub fn run_command_with_env<'a, Args: AsRef<[&'a str]>>(
    args: Args,
    dir: &Path,
    env: &[(String, String)],
) -> anyhow::Result<String> {
    let args = args.as_ref();
    let (code, stdout) = run_command_status(args, dir, env)?;
    if code != Some(0) {
        return Err(anyhow::anyhow!(
            "Command `{}` failed with exit code {code:?}. STDOUT:\n{stdout}",
            args.join(" "),
        ));
    }
    Ok(stdout)
}

/// Runs the command and returns its exit code with the trimmed stdout, leaving
/// the interpretation of a non-zero exit to the caller.
pub fn run_command_status(
    args: &[&str],
    dir: &Path,
    env: &[(String, String)],
) -> anyhow::Result<(Option<i32>, String)> {
    debug!("+ {}", args.join(" "));
    let mut cmd = Command::new(args[0]);
    cmd.args(&args[1..])
        .current_dir(dir)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stderr(Stdio::inherit());
    let out = cmd
        .output()
        .with_context(|| format!("cannot run `{}`", args[0]))?;
    let stdout = String::from_utf8_lossy(out.stdout.trim_ascii()).to_string();
    Ok((out.status.code(), stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_command_at(["definitely-not-a-real-program-4217"], dir.path()).is_err());
    }
}
