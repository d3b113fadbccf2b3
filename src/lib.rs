pub mod annotations;
pub mod bisect;
pub mod command;
pub mod config;
pub mod path_utils;
pub mod repository;
pub mod source_control;
pub mod system_info;
