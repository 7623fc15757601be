use std::{
    io::{BufRead, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    error::{Error, Result},
    scanner::CancelSignal,
};

/// Ctrl-C handling for long scans.
///
/// An interrupt does not stop anything by itself. The next time the
/// scanner polls, the operator is asked to confirm; only a "Y" stops the
/// scan, after the file being processed.
#[derive(Debug)]
pub struct Terminator {
    interrupted: Arc<AtomicBool>,
    confirmed: AtomicBool,
}

impl Terminator {
    /// Start listening for Ctrl-C on a background thread.
    pub fn install() -> Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to start signal listener: {e}"))
            })?;
        let flag = Arc::clone(&interrupted);
        std::thread::Builder::new()
            .name("ctrl-c".into())
            .spawn(move || {
                runtime.block_on(async move {
                    while tokio::signal::ctrl_c().await.is_ok() {
                        flag.store(true, Ordering::SeqCst);
                    }
                });
            })?;

        Ok(Self {
            interrupted,
            confirmed: AtomicBool::new(false),
        })
    }
}

impl CancelSignal for Terminator {
    fn should_stop(&self) -> bool {
        if self.confirmed.load(Ordering::SeqCst) {
            return true;
        }
        if !self.interrupted.swap(false, Ordering::SeqCst) {
            return false;
        }

        let stdin = std::io::stdin();
        let confirmed = confirm_exit(&mut stdin.lock(), &mut std::io::stderr());
        if confirmed {
            tracing::info!("stopping at operator request");
            self.confirmed.store(true, Ordering::SeqCst);
        }
        confirmed
    }
}

/// Ask whether to exit until a Y or N answer arrives. End of input counts
/// as "no".
fn confirm_exit(input: &mut impl BufRead, output: &mut impl Write) -> bool {
    let mut line = String::new();
    loop {
        let _ = write!(output, "Are you sure to exit? [Y/N] ");
        let _ = output.flush();

        line.clear();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        match line.trim() {
            "Y" | "y" => return true,
            "N" | "n" => return false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(input: &str) -> (bool, String) {
        let mut output = Vec::new();
        let result = confirm_exit(&mut input.as_bytes(), &mut output);
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn yes_confirms() {
        assert!(answer("y\n").0);
        assert!(answer("Y\n").0);
    }

    #[test]
    fn no_declines() {
        assert!(!answer("n\n").0);
        assert!(!answer("").0);
    }

    #[test]
    fn asks_again_on_other_input() {
        let (result, prompt) = answer("maybe\nY\n");
        assert!(result);
        assert_eq!(prompt.matches("Are you sure to exit?").count(), 2);
    }
}
