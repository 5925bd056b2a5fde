use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(not(feature = "upcasting"))]
pub trait Persistable: Serialize + DeserializeOwned + Clone + Send + Sync {}

#[cfg(not(feature = "upcasting"))]
impl<T> Persistable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync {}

#[cfg(feature = "upcasting")]
pub trait Persistable: Serialize + DeserializeOwned + Clone + Send + Sync + crate::event::Upcaster {}

#[cfg(feature = "upcasting")]
impl<T> Persistable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + crate::event::Upcaster {}
