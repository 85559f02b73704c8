use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ebpf_crate = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../iotap-ebpf");
    bpf_builder::build("iotap", &ebpf_crate)?;
    Ok(())
}
