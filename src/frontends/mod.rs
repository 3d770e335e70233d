pub use self::alias_file::{alias_table, AliasFileFrontend, AliasTarget};

mod alias_file;
