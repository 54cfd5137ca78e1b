//! Integration tests for the modelsync model cache

mod actions;
mod end_to_end;
mod full_list;
mod subscription;
mod support;
