pub mod object_store;
pub mod vector_index;

pub use object_store::{ObjectStore, StoreError};
pub use vector_index::{cosine_similarity, VectorIndex, VectorRow};
