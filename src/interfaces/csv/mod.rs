pub mod round_writer;
