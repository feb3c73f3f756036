//! One-line error rendering for structured log fields.

use std::error::Error;

/// Render an error and its whole `source()` chain as one `outer: inner:
/// root` line.
///
/// Multi-line `Debug` output is unusable inside tracing fields and sync
/// item samples. Transparent wrapper layers often repeat the message of the
/// error they wrap, so consecutive duplicates are collapsed.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut line = err.to_string();
    let mut last = line.clone();
    let mut source = err.source();
    while let Some(err) = source {
        let message = err.to_string();
        if message != last {
            line.push_str(": ");
            line.push_str(&message);
            last = message;
        }
        source = err.source();
    }
    line
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    #[derive(Debug)]
    struct Layer {
        message: &'static str,
        inner: Option<Box<Layer>>,
    }

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl Error for Layer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            self.inner
                .as_deref()
                .map(|layer| layer as &(dyn Error + 'static))
        }
    }

    #[test]
    fn renders_the_whole_chain_on_one_line() {
        let err = Layer {
            message: "sync failed",
            inner: Some(Box::new(Layer {
                message: "store locked",
                inner: None,
            })),
        };
        assert_eq!(error_chain(&err), "sync failed: store locked");
    }

    #[test]
    fn collapses_consecutive_duplicate_messages() {
        let err = Layer {
            message: "store locked",
            inner: Some(Box::new(Layer {
                message: "store locked",
                inner: Some(Box::new(Layer {
                    message: "disk full",
                    inner: None,
                })),
            })),
        };
        assert_eq!(error_chain(&err), "store locked: disk full");
    }
}
