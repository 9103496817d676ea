//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                      |
//! |----------------|--------------------|----------------------------------|
//! | `serial`       | Transport          | Two tty nodes via `serialport`   |
//! | `stty`         | PortConfigurator   | `su -c stty` or existence check  |
//! | `storage`      | StoragePort        | JSON state file / memory         |
//! | `config_file`  | ConfigPort         | JSON config file                 |
//! | `log_sink`     | EventSink          | `log` facade                     |

pub mod config_file;
pub mod log_sink;
pub mod serial;
pub mod storage;
pub mod stty;
