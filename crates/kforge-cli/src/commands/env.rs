use super::{json_pretty, Host, EXIT_FAILURE, EXIT_SUCCESS};
use kforge_core::WorkspaceLock;
use kforge_runtime::{check_build_tools, format_missing, InitramfsTool};

/// Report what kforge detected about this host and whether it can build here.
pub fn run(host: &Host, json_output: bool) -> Result<u8, String> {
    let env = &host.env;
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    if env.is_supported() {
        checks.push(Check::pass(
            "distribution",
            &format!("{} ({} family)", env.distro_name, env.distro_family),
        ));
    } else {
        checks.push(Check::warn(
            "distribution",
            &format!(
                "{} is not a recognized distribution; Arch-style install will be used",
                if env.distro_name.is_empty() { "this system" } else { env.distro_name.as_str() }
            ),
        ));
    }

    match env.bootloader_update_command() {
        Some(refresh) => checks.push(Check::info(
            "bootloader",
            &format!("Bootloader: {} ({})", env.bootloader, refresh.render()),
        )),
        None => checks.push(Check::warn(
            "bootloader",
            &format!(
                "Bootloader: {}; no tool to refresh the boot menu was found, update it manually after installs",
                env.bootloader
            ),
        )),
    }
    if env.initramfs_tool == InitramfsTool::Unknown {
        checks.push(Check::warn(
            "initramfs",
            "No initramfs tool found; kernels will be installed without an initramfs",
        ));
    } else {
        checks.push(Check::info(
            "initramfs",
            &format!("Initramfs tool: {}", env.initramfs_tool),
        ));
    }
    checks.push(Check::info(
        "running_kernel",
        &format!("Running kernel: {}", host.running_release()),
    ));

    let missing = check_build_tools(env, &host.tools);
    if missing.is_empty() {
        checks.push(Check::pass("build_tools", "Build tools available"));
    } else {
        all_pass = false;
        checks.push(Check::fail("build_tools", &format_missing(&missing)));
    }

    let layout = host.settings.layout();
    match WorkspaceLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass(
            "workspace",
            &format!("Build workspace {} is free", layout.root().display()),
        )),
        Ok(None) => checks.push(Check::warn(
            "workspace",
            "Build workspace is in use by another kforge process",
        )),
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail(
                "workspace",
                &format!("Cannot check build workspace: {e}"),
            ));
        }
    }

    if env.needs_secure_boot_handling() {
        checks.push(Check::info(
            "secure_boot",
            "With Secure Boot enabled, self-built kernels must be signed with an enrolled MOK key",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "ready": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("kforge environment\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("Ready to build.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
