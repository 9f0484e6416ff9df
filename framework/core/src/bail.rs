/// Return this error from a step to indicate that the virtual user is bailing.
///
/// This should be used when a VU encounters an error that is not fatal to the run but means that
/// this VU cannot usefully continue. For example, if the session it set up has been invalidated
/// then the VU may bail, and the scheduler is free to start a fresh VU in its place.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct VuBailError {
    msg: String,
}

impl VuBailError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl Default for VuBailError {
    fn default() -> Self {
        Self {
            msg: "Virtual user is bailing".to_string(),
        }
    }
}
