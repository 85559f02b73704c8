use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, bail};

/// Path of a prebuilt eBPF object. When set, no compilation takes place.
pub static OBJECT_ENV: &str = "IOTAP_EBPF_OBJECT";

static BPF_TARGET: &str = "bpfel-unknown-none";
static BPF_LINKER: &str = "bpf-linker";

// Variables set by the outer cargo invocation which would leak into the
// nested one and make it ignore the eBPF crate's rust-toolchain.toml.
static LEAKING_ENV: &[&str] = &[
    "RUSTUP_TOOLCHAIN",
    "RUSTC",
    "RUSTC_WRAPPER",
    "RUSTC_WORKSPACE_WRAPPER",
    "RUSTFLAGS",
    "CARGO_ENCODED_RUSTFLAGS",
    "CARGO_TARGET_DIR",
    "CARGO_BUILD_TARGET",
];

/// Build the eBPF binary `name` from the crate in `crate_dir` and place it
/// in `OUT_DIR/{name}.bpf.o`.
///
/// The eBPF crate lives outside the host workspace: it's compiled by a nested
/// `cargo build` using its own toolchain file and `.cargo/config.toml`.
///
/// When the toolchain isn't available the build doesn't fail: an empty
/// object is written and a warning is emitted. Loading that object at runtime
/// results in a clear error instead of a broken host build.
pub fn build(name: &str, crate_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed={}", crate_dir.display());
    if let Some(common) = crate_dir.parent().map(|dir| dir.join("iotap-common")) {
        println!("cargo:rerun-if-changed={}", common.display());
    }
    println!("cargo:rerun-if-env-changed={OBJECT_ENV}");

    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR not set")?);
    let out_object = out_dir.join(format!("{name}.bpf.o"));

    if let Ok(prebuilt) = env::var(OBJECT_ENV) {
        fs::copy(&prebuilt, &out_object)
            .with_context(|| format!("copying prebuilt eBPF object {prebuilt}"))?;
        return Ok(());
    }

    if let Err(err) = compile(name, crate_dir, &out_dir, &out_object) {
        println!("cargo:warning=eBPF probe {name} not built: {err:#}");
        println!("cargo:warning=set {OBJECT_ENV} to use a prebuilt object");
        fs::write(&out_object, []).context("writing placeholder eBPF object")?;
    }

    Ok(())
}

fn compile(name: &str, crate_dir: &Path, out_dir: &Path, out_object: &Path) -> anyhow::Result<()> {
    which::which(BPF_LINKER).with_context(|| format!("{BPF_LINKER} not found in PATH"))?;

    let target_dir = out_dir.join(format!("{name}-ebpf-target"));
    let mut command = Command::new("cargo");
    for var in LEAKING_ENV {
        command.env_remove(var);
    }
    let status = command
        .current_dir(crate_dir)
        .args(["build", "--release", "--bin", name])
        .arg("--target-dir")
        .arg(&target_dir)
        .status()
        .context("Failed to execute cargo")?;

    if !status.success() {
        bail!("Failed to compile eBPF program");
    }

    let built = target_dir.join(BPF_TARGET).join("release").join(name);
    fs::copy(&built, out_object)
        .with_context(|| format!("copying {} to {}", built.display(), out_object.display()))?;

    Ok(())
}
