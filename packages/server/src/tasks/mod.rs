pub mod bus_cleanup;

pub use bus_cleanup::start_bus_cleanup_task;
