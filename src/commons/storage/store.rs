//! The key-value store.

use std::{error, fmt};
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use url::Url;

macro_rules! store {
    ( $( ( $variant:ident, $module:ident ) )* ) => {


        //------------ KeyValueStore -----------------------------------------

        /// A store of JSON values for one namespace.
        ///
        /// All access to values happens through [`execute`][Self::execute]
        /// which runs a closure while holding an exclusive lock on a scope.
        /// Everything the closure reads and writes is therefore seen as one
        /// atomic step by every other user of the same scope, including
        /// other processes for the disk backend.
        #[derive(Debug)]
        pub struct KeyValueStore(StoreInner);

        #[derive(Debug)]
        enum StoreInner {
            $(
                $variant( super::backends::$module::Store),
            )*
        }

        impl KeyValueStore {
            /// Opens the store for `namespace` at the given storage URI.
            pub fn new(
                storage_uri: &Url, namespace: &str
            ) -> Result<Self, StoreNewError> {
                if namespace.is_empty() {
                    return Err(StoreNewError::EmptyNamespace)
                }
                $(
                    if let Some(inner) =
                    super::backends::$module::Store::from_uri(
                        storage_uri, namespace
                    )? {
                        return Ok(KeyValueStore(StoreInner::$variant(inner)))
                    }
                )*

                Err(StoreNewError::UnknownStorageScheme(
                    storage_uri.scheme().into()
                ))
            }

            /// Runs `op` as a transaction on `scope`.
            pub fn execute<F, T>(
                &self, scope: &str, op: F
            ) -> Result<T, Error>
            where
                F: for<'a> FnOnce(&mut Transaction<'a>) -> Result<T, Error>
            {
                if scope.is_empty() {
                    return Err(Error::empty_name())
                }
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => {
                            inner.execute(scope, op)
                        }
                    )*
                }
            }

            /// Returns whether the namespace holds no values at all.
            pub fn is_empty(&self) -> Result<bool, Error> {
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => {
                            Ok(inner.is_empty()?)
                        }
                    )*
                }
            }

            /// Returns the names of all non-empty scopes, sorted.
            pub fn list_scopes(&self) -> Result<Vec<String>, Error> {
                let mut res = match &self.0 {
                    $(
                        StoreInner::$variant(inner) => {
                            inner.list_scopes()?
                        }
                    )*
                };
                res.sort();
                Ok(res)
            }

            /// Removes everything stored in the namespace.
            pub fn wipe(&self) -> Result<(), Error> {
                match &self.0 {
                    $(
                        StoreInner::$variant(inner) => {
                            Ok(inner.wipe()?)
                        }
                    )*
                }
            }
        }

        /// # Shortcuts
        ///
        /// Each of these runs a transaction with a single operation.
        impl KeyValueStore {
            pub fn get<T: DeserializeOwned>(
                &self, scope: &str, key: &str
            ) -> Result<Option<T>, Error> {
                self.execute(scope, |txn| txn.get(key))
            }

            pub fn store<T: Serialize>(
                &self, scope: &str, key: &str, value: &T
            ) -> Result<(), Error> {
                self.execute(scope, |txn| txn.store(key, value))
            }

            pub fn list_keys(&self, scope: &str) -> Result<Vec<String>, Error> {
                self.execute(scope, |txn| txn.list_keys())
            }
        }


        //------------ Transaction -------------------------------------------

        /// Access to the values of one locked scope.
        #[derive(Debug)]
        pub struct Transaction<'a>(TransactionInner<'a>);

        #[derive(Debug)]
        enum TransactionInner<'a> {
            $(
                $variant(super::backends::$module::Transaction<'a>),
            )*
        }

        $(
            impl<'a> From<super::backends::$module::Transaction<'a>>
            for Transaction<'a> {
                fn from(
                    src: super::backends::$module::Transaction<'a>
                ) -> Self {
                    Self(TransactionInner::$variant(src))
                }
            }
        )*

        /// # Reading
        impl Transaction<'_> {
            pub fn has(&mut self, key: &str) -> Result<bool, Error> {
                Error::check_name(key)?;
                match &mut self.0 {
                    $(
                        TransactionInner::$variant(inner) => {
                            Ok(inner.has(key)?)
                        }
                    )*
                }
            }

            pub fn get<T: DeserializeOwned>(
                &mut self, key: &str
            ) -> Result<Option<T>, Error> {
                Error::check_name(key)?;
                match &mut self.0 {
                    $(
                        TransactionInner::$variant(inner) => {
                            Ok(inner.get(key)?)
                        }
                    )*
                }
            }

            /// Returns all keys of the scope, sorted.
            pub fn list_keys(&mut self) -> Result<Vec<String>, Error> {
                let mut res = match &mut self.0 {
                    $(
                        TransactionInner::$variant(inner) => {
                            inner.list_keys()?
                        }
                    )*
                };
                res.sort();
                Ok(res)
            }
        }


        /// # Writing
        impl Transaction<'_> {
            /// Stores a value, quietly replacing an existing one.
            pub fn store<T: Serialize>(
                &mut self, key: &str, value: &T
            ) -> Result<(), Error> {
                Error::check_name(key)?;
                match &mut self.0 {
                    $(
                        TransactionInner::$variant(inner) => {
                            Ok(inner.store(key, value)?)
                        }
                    )*
                }
            }

            /// Removes a value. Removing an absent value is not an error.
            pub fn delete(&mut self, key: &str) -> Result<(), Error> {
                Error::check_name(key)?;
                match &mut self.0 {
                    $(
                        TransactionInner::$variant(inner) => {
                            Ok(inner.delete(key)?)
                        }
                    )*
                }
            }

            /// Removes all values of the scope.
            pub fn clear(&mut self) -> Result<(), Error> {
                match &mut self.0 {
                    $(
                        TransactionInner::$variant(inner) => {
                            Ok(inner.clear()?)
                        }
                    )*
                }
            }
        }


        //------------ Error -------------------------------------------------

        #[derive(Debug)]
        pub struct Error(ErrorInner);

        #[derive(Debug)]
        enum ErrorInner {
            EmptyName,
            $(
                $variant(super::backends::$module::Error),
            )*
        }

        impl Error {
            fn empty_name() -> Self {
                Error(ErrorInner::EmptyName)
            }

            fn check_name(name: &str) -> Result<(), Self> {
                if name.is_empty() {
                    Err(Self::empty_name())
                }
                else {
                    Ok(())
                }
            }
        }

        $(
            impl From<super::backends::$module::Error> for Error {
                fn from(src: super::backends::$module::Error) -> Self {
                    Self(ErrorInner::$variant(src))
                }
            }
        )*

        impl fmt::Display for Error {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match &self.0 {
                    ErrorInner::EmptyName => {
                        f.write_str("empty scope or key name")
                    }
                    $(
                        ErrorInner::$variant(inner) => inner.fmt(f),
                    )*
                }
            }
        }

        impl error::Error for Error { }


        //------------ StoreNewError -----------------------------------------

        #[derive(Debug)]
        pub enum StoreNewError {
            UnknownStorageScheme(String),
            EmptyNamespace,
            Store(Error)
        }

        impl From<Error> for StoreNewError {
            fn from(src: Error) -> Self {
                Self::Store(src)
            }
        }

        $(
            impl From<super::backends::$module::Error> for StoreNewError {
                fn from(src: super::backends::$module::Error) -> Self {
                    Self::Store(src.into())
                }
            }
        )*

        impl fmt::Display for StoreNewError {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match self {
                    Self::UnknownStorageScheme(scheme) => {
                        write!(f, "unknown storage scheme: {scheme}")
                    }
                    Self::EmptyNamespace => f.write_str("empty namespace"),
                    Self::Store(inner) => inner.fmt(f)
                }
            }
        }

        impl error::Error for StoreNewError { }
    }
}

store! {
    (Disk, disk)
    (Memory, memory)
}
