pub mod comm;
pub mod config;
pub mod domain;
pub mod domain_reader;
pub mod error;
pub mod ghost_filler;
pub mod inter_level_comm;
pub mod krylov;
pub mod local_data;
pub mod multigrid;
pub mod patch_info;
pub mod patch_operator;
pub mod schur;
pub mod side;
pub mod solvers;
pub mod timer;
pub mod vector;
