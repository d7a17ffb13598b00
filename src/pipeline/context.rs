// src/pipeline/context.rs

use crate::parsing::Parser;
use crate::storage::AreaWriter;

/// One parser bound to one writer for exactly one run.
pub struct ExecutionContext {
    parser: Box<dyn Parser>,
    writer: Box<dyn AreaWriter>,
}

impl ExecutionContext {
    pub fn new(parser: Box<dyn Parser>, writer: Box<dyn AreaWriter>) -> Self {
        Self { parser, writer }
    }

    pub fn parser(&self) -> &dyn Parser {
        self.parser.as_ref()
    }

    pub fn into_parts(self) -> (Box<dyn Parser>, Box<dyn AreaWriter>) {
        (self.parser, self.writer)
    }
}
