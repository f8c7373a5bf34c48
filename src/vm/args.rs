//! Hypervisor command line.
//!
//! Device slots follow the layout the illumos bhyve zone brand uses
//! (`pci_slot_t` in `usr/src/lib/brand/bhyve/zone/boot.c`), so an image built
//! here boots in a zone without its devices moving around.

use super::{LaunchSpec, VncEndpoint};

const SLOT_HOST_BRIDGE: u8 = 0;
const SLOT_CDROM: u8 = 3;
const SLOT_BOOT_DISK: u8 = 4;
const SLOT_NIC: u8 = 6;
const SLOT_FBUF: u8 = 30;
const SLOT_LPC: u8 = 31;

/// Arguments shared by both boot cycles, without the VM name.
fn common_args(spec: &LaunchSpec) -> Vec<String> {
    vec![
        "-D".to_string(),
        "-H".to_string(),
        "-c".to_string(),
        spec.cpus.clone(),
        "-l".to_string(),
        format!("bootrom,{}", spec.bootrom.display()),
        "-m".to_string(),
        spec.memory_mb.to_string(),
        "-s".to_string(),
        format!("{SLOT_HOST_BRIDGE},hostbridge,model=i440fx"),
        "-s".to_string(),
        format!("{SLOT_BOOT_DISK},virtio-blk,{}", spec.disk_path.display()),
        "-s".to_string(),
        format!("{SLOT_NIC},virtio-net-viona,vnic={}", spec.vnic),
        "-s".to_string(),
        fbuf_device(&spec.vnc),
        "-s".to_string(),
        format!("{SLOT_FBUF}:1,xhci,tablet"),
        "-s".to_string(),
        format!("{SLOT_LPC},lpc"),
    ]
}

/// `fbuf` device string; `password=` only when one was generated.
pub fn fbuf_device(vnc: &VncEndpoint) -> String {
    let mut s = format!(
        "{SLOT_FBUF}:0,fbuf,vga=off,rfb={}:{}",
        vnc.bind_address, vnc.port
    );
    if let Some(pw) = &vnc.password {
        s.push_str(&format!(",password={pw}"));
    }
    s
}

/// First boot: install media attached.
pub fn boot_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args = common_args(spec);
    args.push("-s".to_string());
    args.push(format!("{SLOT_CDROM},ahci-cd,{}", spec.iso_path.display()));
    args.push(spec.vm_name.clone());
    args
}

/// Second boot after the installer's reboot: disk only.
pub fn reboot_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args = common_args(spec);
    args.push(spec.vm_name.clone());
    args
}

/// `bhyvectl` arguments that tear the VM down.
pub fn destroy_args(vm_name: &str) -> Vec<String> {
    vec![format!("--vm={vm_name}"), "--destroy".to_string()]
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            vm_name: "packer-omnios".to_string(),
            cpus: "cpus=2,sockets=1,cores=2".to_string(),
            memory_mb: 2048,
            bootrom: PathBuf::from("/usr/share/bhyve/uefi-rom.bin"),
            disk_path: PathBuf::from("/dev/zvol/rdsk/zones/packer-omnios"),
            iso_path: PathBuf::from("/isos/omnios.iso"),
            vnic: "packer0".to_string(),
            vnc: VncEndpoint {
                bind_address: "127.0.0.1".to_string(),
                port: 5901,
                password: None,
            },
        }
    }

    #[test]
    fn boot_args_attach_install_media_and_end_with_vm_name() {
        let args = boot_args(&spec());
        assert!(args.contains(&"3,ahci-cd,/isos/omnios.iso".to_string()));
        assert!(args.contains(&"4,virtio-blk,/dev/zvol/rdsk/zones/packer-omnios".to_string()));
        assert!(args.contains(&"6,virtio-net-viona,vnic=packer0".to_string()));
        assert!(args.contains(&"31,lpc".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("packer-omnios"));
        let c = args.iter().position(|a| a == "-c").unwrap();
        assert_eq!(args[c + 1], "cpus=2,sockets=1,cores=2");
        let m = args.iter().position(|a| a == "-m").unwrap();
        assert_eq!(args[m + 1], "2048");
    }

    #[test]
    fn reboot_args_drop_only_the_cdrom() {
        let boot = boot_args(&spec());
        let reboot = reboot_args(&spec());
        assert!(!reboot.iter().any(|a| a.contains("ahci-cd")));
        assert_eq!(boot.len(), reboot.len() + 2);
        assert_eq!(reboot.last(), boot.last());
    }

    #[test]
    fn framebuffer_embeds_password_only_when_set() {
        let mut vnc = spec().vnc;
        assert_eq!(fbuf_device(&vnc), "30:0,fbuf,vga=off,rfb=127.0.0.1:5901");
        vnc.password = Some("s3cr3tpw".to_string());
        assert_eq!(
            fbuf_device(&vnc),
            "30:0,fbuf,vga=off,rfb=127.0.0.1:5901,password=s3cr3tpw"
        );
    }

    #[test]
    fn destroy_targets_the_named_vm() {
        assert_eq!(destroy_args("packer-omnios"), ["--vm=packer-omnios", "--destroy"]);
    }
}
