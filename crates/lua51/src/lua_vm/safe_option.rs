/// Resource limits for one state. The value stack is fixed-capacity;
/// pushes past it and frame chains past `max_call_depth` surface as
/// stack-overflow errors instead of unbounded growth.
#[derive(Debug, Clone)]
pub struct SafeOption {
    pub stack_size: usize,
    pub max_call_depth: usize,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            stack_size: 1024,
            max_call_depth: 200,
        }
    }
}
