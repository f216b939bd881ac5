//! Filesystem-based storage.

use std::{error, fmt, fs, io};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str};
use percent_encoding::utf8_percent_encode;
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use tempfile::NamedTempFile;
use url::Url;
use super::super::store::{
    Error as SuperError,
    Transaction as SuperTransaction
};


//------------ Constants -----------------------------------------------------

/// The directory under the root that contains temporary files.
const TMP_FILE_DIR: &str = ".tmp";

/// The directory under the root that contains the lock files.
const LOCK_FILE_DIR: &str = ".locks";

/// The name of the lock file for a scope.
const LOCK_FILE_NAME: &str = "lockfile.lock";

/// The extension of files holding values.
const VALUE_EXTENSION: &str = ".json";

/// The characters escaped in file names.
///
/// Names and scopes can be arbitrary strings. Everything but letters,
/// digits, dash, and underscore is percent-encoded so that the resulting
/// file names are safe, never start with a period, and decode uniquely.
const NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');


//------------ Store ---------------------------------------------------------

/// A storage backend that uses the filesystem for storing values.
///
/// Each namespace has its own directory under the base directory given by
/// the URI. A scope is a directory under the namespace directory and each
/// value is a file with the extension `.json` in it holding the value as a
/// JSON document.
///
/// Values are written to a temporary file in `.tmp` under the base
/// directory first and then moved into place so a value is never seen half
/// written. Transactions take an advisory lock on a lock file in
/// `.locks/$(namespace)/$(scope)`, which serializes them across processes.
#[derive(Debug)]
pub struct Store {
    /// The directory of the namespace.
    root: PathBuf,

    /// The directory for temporary files, shared between namespaces.
    tmp: PathBuf,

    /// The directory of the lock files of the namespace.
    locks: PathBuf,
}

impl Store {
    pub fn from_uri(
        uri: &Url, namespace: &str
    ) -> Result<Option<Self>, Error> {
        if uri.scheme() != "file" && uri.scheme() != "local" {
            return Ok(None)
        }
        if !uri.authority().is_empty() {
            return Err(Error::other(format!(
                "non-local path with host '{}'", uri.authority()
            )))
        }
        let base = PathBuf::from(uri.path());
        if !base.is_absolute() {
            return Err(Error::other(format!(
                "{} is not absolute", base.display()
            )))
        }
        Self::new(&base, namespace).map(Some)
    }

    fn new(base: &Path, namespace: &str) -> Result<Self, Error> {
        let namespace = encode(namespace);
        let root = base.join(namespace.as_ref());
        let tmp = base.join(TMP_FILE_DIR);
        let mut locks = base.join(LOCK_FILE_DIR);
        locks.push(namespace.as_ref());

        fs::create_dir_all(&tmp).map_err(|err| {
            Error::io(
                format!(
                    "failed to create temporary directory '{}'",
                    tmp.display()
                ),
                err
            )
        })?;

        Ok(Self { root, tmp, locks })
    }

    pub fn execute<F, T>(
        &self, scope: &str, op: F
    ) -> Result<T, SuperError>
    where
        F: for<'a> FnOnce(&mut SuperTransaction<'a>) -> Result<T, SuperError>
    {
        let mut file_lock = FileLock::create(
            self.locks.join(encode(scope).as_ref())
        )?;
        let _write_lock = file_lock.write()?;
        op(&mut SuperTransaction::from(Transaction {
            store: self,
            dir: self.root.join(encode(scope).as_ref()),
        }))
    }
}


/// # Store-wide access
impl Store {
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.list_scopes()?.is_empty())
    }

    pub fn list_scopes(&self) -> Result<Vec<String>, Error> {
        let mut res = Vec::new();
        for (name, file_type) in read_dir(&self.root)? {
            if file_type.is_dir() {
                if let Some(name) = decode(&name) {
                    res.push(name)
                }
            }
        }
        Ok(res)
    }

    pub fn wipe(&self) -> Result<(), Error> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(Error::io(
                    format!(
                        "failed to recursively delete directory '{}'",
                        self.root.display()
                    ),
                    err
                ))
            }
        }
    }
}


//------------ Transaction ---------------------------------------------------

#[derive(Debug)]
pub struct Transaction<'a> {
    store: &'a Store,

    /// The directory of the locked scope.
    dir: PathBuf,
}

impl Transaction<'_> {
    fn key_path(&self, key: &str) -> PathBuf {
        let mut name = encode(key).into_owned();
        name.push_str(VALUE_EXTENSION);
        self.dir.join(name)
    }
}

/// # Reading
impl Transaction<'_> {
    pub fn has(&self, key: &str) -> Result<bool, Error> {
        self.key_path(key).try_exists().map_err(|err| {
            Error::io(
                format!("failed to check existance of key '{key}'"),
                err
            )
        })
    }

    /// Returns the contents of the stored value with the given key.
    ///
    /// If the value does not exist, returns `Ok(None)`.
    pub fn get<T: DeserializeOwned>(
        &self, key: &str
    ) -> Result<Option<T>, Error> {
        let path = self.key_path(key);
        let file = match File::open(&path) {
            Ok(file) => io::BufReader::new(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to open file '{}'", path.display()),
                    err
                ))
            }
        };
        match serde_json::from_reader(file) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                if err.is_io() {
                    Err(Error::io(
                        format!(
                            "failed to read stored file '{}'",
                            path.display()
                        ),
                        err.into()
                    ))
                }
                else {
                    Err(Error::Deserialize {
                        path, err: err.to_string()
                    })
                }
            }
        }
    }

    pub fn list_keys(&self) -> Result<Vec<String>, Error> {
        let mut res = Vec::new();
        for (name, file_type) in read_dir(&self.dir)? {
            if !file_type.is_file() {
                continue
            }
            if let Some(name) = name.strip_suffix(VALUE_EXTENSION).and_then(
                decode
            ) {
                res.push(name)
            }
        }
        Ok(res)
    }
}

/// # Writing
impl Transaction<'_> {
    /// Stores the provided value under the given key.
    ///
    /// Quietly overwrites a possibly already existing value.
    pub fn store<T: Serialize>(
        &self, key: &str, value: &T
    ) -> Result<(), Error> {
        let path = self.key_path(key);

        create_dirs(&self.dir)?;

        // tempfile cleans up the temporary file should we bail out before
        // persisting it.
        let mut tmp_file = NamedTempFile::new_in(
            &self.store.tmp
        ).map_err(|err| {
            Error::io(
                format!("writing temp file failed for key: '{key}'"),
                err,
            )
        })?;

        let res = serde_json::to_writer_pretty(
            &mut io::BufWriter::new(&mut tmp_file),
            value
        );
        if let Err(err) = res {
            if err.is_io() {
                return Err(Error::io(
                    format!(
                        "failed to write temp file '{}' for key '{}'",
                        tmp_file.as_ref().display(),
                        key
                    ),
                    err.into(),
                ))
            }
            else {
                return Err(Error::Serialize { path, err: err.to_string() })
            }
        }

        tmp_file.persist(&path).map_err(|err| {
            Error::io(
                format!(
                    "failed to rename temp file '{}' to '{}'",
                    err.file.path().display(),
                    path.display()
                ),
                err.error,
            )
        })?;

        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), Error> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => { }
            Err(err) if err.kind() == io::ErrorKind::NotFound => { }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to delete file '{}'", path.display()),
                    err
                ))
            }
        }
        // Only succeeds for an empty directory which is what we want.
        let _ = fs::remove_dir(&self.dir);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), Error> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(Error::io(
                    format!(
                        "failed to recursively delete directory '{}'",
                        self.dir.display()
                    ),
                    err
                ))
            }
        }
    }
}


//------------ FileLock ------------------------------------------------------

#[derive(Debug)]
struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    fn create(path: PathBuf) -> Result<Self, Error> {
        let lock_path = path.join(LOCK_FILE_NAME);
        create_dirs(&path)?;

        let mut options = OpenOptions::new();
        options.create(true).truncate(false).read(true).write(true);
        let lock_file = options.open(&lock_path).map_err(|err| {
            Error::io(
                format!(
                    "failed to open lock file '{}'", lock_path.display(),
                ),
                err
            )
        })?;

        Ok(FileLock { lock: fd_lock::RwLock::new(lock_file) })
    }

    fn write(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, Error> {
        self.lock
            .write()
            .map_err(|e| Error::other(format!("Cannot get file lock: {e}")))
    }
}


//------------ Helpers -------------------------------------------------------

fn encode(name: &str) -> Cow<'_, str> {
    utf8_percent_encode(name, NAME_ENCODE_SET).into()
}

fn decode(name: &str) -> Option<String> {
    percent_decode_str(name).decode_utf8().ok().map(Cow::into_owned)
}

fn create_dirs(path: &Path) -> Result<(), Error> {
    fs::create_dir_all(path).map_err(|err| {
        Error::io(
            format!("Failed to create directory '{}'", path.display()),
            err
        )
    })
}

/// Returns the names and file types of a directory’s entries.
///
/// A missing directory has no entries.
fn read_dir(path: &Path) -> Result<Vec<(String, fs::FileType)>, Error> {
    let context = || format!("failed to read directory '{}'", path.display());
    let dir = match fs::read_dir(path) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Ok(Vec::new())
        }
        Err(err) => return Err(Error::io(context(), err))
    };
    let mut res = Vec::new();
    for item in dir {
        let item = item.map_err(|err| Error::io(context(), err))?;
        let file_type = item.file_type().map_err(|err| {
            Error::io(context(), err)
        })?;
        if let Ok(name) = item.file_name().into_string() {
            res.push((name, file_type))
        }
    }
    Ok(res)
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
    Deserialize {
        path: PathBuf,
        err: String,
    },
    Serialize {
        path: PathBuf,
        err: String,
    },
    Other(String),
}

impl Error {
    fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        Error::Io { context: context.into(), err }
    }

    fn other(info: impl Into<String>) -> Self {
        Error::Other(info.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { context, err } => {
                write!(f, "{context}: {err}")
            }
            Error::Deserialize { path, err } => {
                write!(f,
                    "failed to deserialize value in '{}': {err}",
                    path.display()
                )
            }
            Error::Serialize { path, err } => {
                write!(f,
                    "failed to serialize value for '{}': {err}",
                    path.display()
                )
            }
            Error::Other(s) => f.write_str(s)
        }
    }
}

impl error::Error for Error { }
