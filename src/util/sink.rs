//! Output sinks for the print-family actions.
//!
//! Each sink is a line-buffered handle. `-fprint` targets are deduplicated
//! by name so two actions aimed at the same file append to one stream
//! instead of clobbering each other.

use std::cell::RefCell;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, LineWriter, Stdout, Write, stdout};
use std::rc::Rc;

#[derive(Debug)]
pub enum Sink {
    Stdout(LineWriter<Stdout>),
    File(LineWriter<File>),
    #[cfg(test)]
    Buffer(Vec<u8>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            Self::Stdout(ref mut w) => w.write(buf),
            Self::File(ref mut w) => w.write(buf),
            #[cfg(test)]
            Self::Buffer(ref mut w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            Self::Stdout(ref mut w) => w.flush(),
            Self::File(ref mut w) => w.flush(),
            #[cfg(test)]
            Self::Buffer(_) => Ok(()),
        }
    }
}

/// Shared handle to one output stream.
pub type SinkRef = Rc<RefCell<Sink>>;

#[cfg(test)]
pub fn buffer_sink() -> SinkRef {
    Rc::new(RefCell::new(Sink::Buffer(Vec::new())))
}

#[cfg(test)]
pub fn buffer_contents(sink: &SinkRef) -> Vec<u8> {
    match *sink.borrow() {
        Sink::Buffer(ref buf) => buf.clone(),
        _ => Vec::new(),
    }
}

/// Registry of every stream opened for the current run.
#[derive(Debug)]
pub struct Sinks {
    out: SinkRef,
    files: Vec<(OsString, SinkRef)>,
}

impl Sinks {
    #[must_use]
    pub fn new() -> Self {
        Self {
            out: Rc::new(RefCell::new(Sink::Stdout(LineWriter::new(stdout())))),
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn stdout(&self) -> SinkRef {
        Rc::clone(&self.out)
    }

    /// Open (or reuse) the sink for `-fprint FILE` and friends.
    pub fn open(&mut self, name: &OsStr) -> io::Result<SinkRef> {
        if let Some((_, sink)) = self.files.iter().find(|(n, _)| n.as_os_str() == name) {
            return Ok(Rc::clone(sink));
        }
        let file = File::create(name)?;
        let sink: SinkRef = Rc::new(RefCell::new(Sink::File(LineWriter::new(file))));
        self.files.push((name.to_owned(), Rc::clone(&sink)));
        Ok(sink)
    }

    /// Number of descriptors held open by file sinks.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    pub fn flush_all(&self) -> io::Result<()> {
        self.out.borrow_mut().flush()?;
        for &(_, ref sink) in &self.files {
            sink.borrow_mut().flush()?;
        }
        Ok(())
    }
}

impl Default for Sinks {
    fn default() -> Self {
        Self::new()
    }
}
