mod common;

mod flow;
