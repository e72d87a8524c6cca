use std::{
    os::unix::io::{AsFd, AsRawFd},
    path::PathBuf,
};

/// Path of the node an open descriptor refers to
pub trait DevPath {
    /// Resolve the path through `/proc/self/fd`, `None` if it cannot be read
    fn dev_path(&self) -> Option<PathBuf>;
}

impl<A: AsFd> DevPath for A {
    fn dev_path(&self) -> Option<PathBuf> {
        std::fs::read_link(format!("/proc/self/fd/{}", self.as_fd().as_raw_fd())).ok()
    }
}

#[cfg(test)]
mod test {
    use super::DevPath;

    #[test]
    fn dev_path_resolves_open_node() {
        let file = std::fs::File::open("/dev/null").unwrap();
        assert_eq!(file.dev_path(), Some("/dev/null".into()));
    }
}
