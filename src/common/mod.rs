pub type Map<K, V> = hashbrown::HashMap<K, V>;

pub use id_counter::IdCounter;

mod id_counter;
