//! CLI command implementations.
//!
//! | Module   | Commands handled                                |
//! |----------|-------------------------------------------------|
//! | `serve`  | `Serve`                                         |
//! | `db`     | `InitDb`                                        |
//! | `audit`  | `Audit` (`history`, `show`, `active`, `verify`) |

pub mod audit;
pub mod db;
pub mod serve;

pub use audit::cmd_audit;
pub use db::cmd_init_db;
pub use serve::cmd_serve;
