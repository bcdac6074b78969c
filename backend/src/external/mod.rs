//! External service integrations

pub mod earth_engine;
pub mod firestore;
pub mod google_auth;

pub use earth_engine::{EarthEngineClient, GeoProvider, ReduceRequest, ReducedDay};
pub use firestore::FirestoreDocumentStore;
pub use google_auth::{GoogleAuth, ServiceAccountKey};
