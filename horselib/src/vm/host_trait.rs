use super::VmError;

/// I/O boundary between the VM's builtin functions and the outside world.
pub trait HostIo {
    fn write(&mut self, s: &str, newline: bool) -> Result<(), VmError>;
}
