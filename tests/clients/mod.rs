//! Client behavior across connection loss and recovery.

mod light;
mod subscription;
