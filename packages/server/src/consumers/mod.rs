pub mod process_result;
