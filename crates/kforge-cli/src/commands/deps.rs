use super::{confirm, json_pretty, spin_fail, spin_ok, spinner, Host, EXIT_SUCCESS};
use kforge_runtime::{dependency_plan, DependencyPlan, ExitOutcome};

/// Install the build dependency set for this distribution in one
/// privileged invocation.
pub fn run(host: &Host, assume_yes: bool, dry_run: bool, json: bool) -> Result<u8, String> {
    let chain = match dependency_plan(&host.env, host.runner(), &host.tools) {
        DependencyPlan::Satisfied => {
            if json {
                println!("{}", json_pretty(&serde_json::json!({"status": "satisfied"}))?);
            } else {
                println!("build dependencies are already installed");
            }
            return Ok(EXIT_SUCCESS);
        }
        DependencyPlan::Unsupported => {
            return Err(format!(
                "no build dependency list for {}; install a compiler toolchain, make, flex, bison, bc, perl and the libelf/openssl headers manually",
                host.env.distro_name
            ));
        }
        DependencyPlan::Install(chain) => chain,
    };

    let rendered = chain.render();
    if dry_run {
        if json {
            println!(
                "{}",
                json_pretty(&serde_json::json!({"status": "pending", "command": rendered}))?
            );
        } else {
            println!("{rendered}");
        }
        return Ok(EXIT_SUCCESS);
    }

    if !json {
        println!("The following will run as root:\n  {rendered}\n");
    }
    if !confirm("Install build dependencies?", assume_yes)? {
        return Err("dependency installation aborted".to_owned());
    }

    let pb = (!json).then(|| spinner("installing build dependencies (may require password)..."));
    let finish_fail = |msg: &str| {
        if let Some(pb) = &pb {
            spin_fail(pb, msg);
        }
    };
    let output = host.runner().run_privileged(&chain).map_err(|e| {
        finish_fail("dependency installation failed");
        e.to_string()
    })?;
    match output.outcome {
        ExitOutcome::Exited(0) => {}
        ExitOutcome::ElevationDeclined => {
            finish_fail("authentication declined");
            return Err("authentication was declined".to_owned());
        }
        other => {
            finish_fail("dependency installation failed");
            let detail = output
                .stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no output");
            return Err(format!(
                "dependency installation failed (exit code {}): {detail}",
                other.code()
            ));
        }
    }

    if let Some(pb) = &pb {
        spin_ok(pb, "build dependencies installed");
    }
    if json {
        println!("{}", json_pretty(&serde_json::json!({"status": "installed"}))?);
    }
    Ok(EXIT_SUCCESS)
}
