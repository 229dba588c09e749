pub mod archive;
pub mod backup_config;
pub mod cli;
pub mod compress;
pub mod encrypt;
pub mod file_ext;
pub mod finish;
pub mod keychain;
pub mod log;
pub mod outcome;
pub mod plugin;
pub mod publish;
pub mod redacted;
pub mod result_error;
pub mod retention;
pub mod run;
pub mod tools;
pub mod validate;
pub mod workspace;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
