use std::io::{self, Write};

use super::{HostIo, VmError, VmErrorKind};

#[derive(Debug, Default)]
pub struct StdIoHost;

impl HostIo for StdIoHost {
    fn write(&mut self, s: &str, newline: bool) -> Result<(), VmError> {
        if newline {
            println!("{s}");
        } else {
            print!("{s}");
            io::stdout()
                .flush()
                .map_err(|e| VmError::new(VmErrorKind::HostError, e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TestHost {
    pub output: String,
}

impl HostIo for TestHost {
    fn write(&mut self, s: &str, newline: bool) -> Result<(), VmError> {
        self.output.push_str(s);
        if newline {
            self.output.push('\n');
        }
        Ok(())
    }
}
