//! AppleScript sources compiled into the binary.
//!
//! Scripts are fed to `osascript -` on stdin, so nothing is written to disk.

use vmforge_shared::errors::{ForgeError, ForgeResult};

pub const CREATE_VM: &str = "create_vm.applescript";
pub const CUSTOMIZE_VM: &str = "customize_vm.applescript";
pub const ADD_DRIVE: &str = "add_drive.applescript";
pub const ATTACH_ISO: &str = "attach_iso.applescript";
pub const ADD_PORT_FORWARD: &str = "add_port_forward.applescript";
pub const CLEAR_PORT_FORWARDS: &str = "clear_port_forwards.applescript";

const EMBEDDED: &[(&str, &str)] = &[
    (CREATE_VM, include_str!("../../scripts/create_vm.applescript")),
    (CUSTOMIZE_VM, include_str!("../../scripts/customize_vm.applescript")),
    (ADD_DRIVE, include_str!("../../scripts/add_drive.applescript")),
    (ATTACH_ISO, include_str!("../../scripts/attach_iso.applescript")),
    (
        ADD_PORT_FORWARD,
        include_str!("../../scripts/add_port_forward.applescript"),
    ),
    (
        CLEAR_PORT_FORWARDS,
        include_str!("../../scripts/clear_port_forwards.applescript"),
    ),
];

/// Source text of an embedded script.
pub fn source(name: &str) -> ForgeResult<&'static str> {
    EMBEDDED
        .iter()
        .find(|(script, _)| *script == name)
        .map(|(_, body)| *body)
        .ok_or_else(|| ForgeError::Internal(format!("unknown script {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_script_is_embedded() {
        for name in [
            CREATE_VM,
            CUSTOMIZE_VM,
            ADD_DRIVE,
            ATTACH_ISO,
            ADD_PORT_FORWARD,
            CLEAR_PORT_FORWARDS,
        ] {
            let body = source(name).unwrap();
            assert!(body.contains("on run argv"), "{} has no run handler", name);
        }
    }

    #[test]
    fn test_unknown_script() {
        let err = source("export_vm.applescript").unwrap_err();
        assert!(matches!(err, ForgeError::Internal(_)));
    }
}
