mod bench;
mod ex1;
mod form;
mod options;
mod partitioning;
mod precond;
mod state;
