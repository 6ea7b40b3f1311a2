pub mod scenario_reader;
pub mod session_writer;
