pub mod gpu_hours;
pub mod iolog;
pub mod misc;
pub mod size;
pub mod slurm;
