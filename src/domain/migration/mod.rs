pub mod mobility;
