
#[derive(Debug, Clone)]
pub enum ErrorKind {
    // 类型错误：例如 1 + "a"
    TypeError(String),
    // 变量错误：访问未定义的全局变量
    UndefinedVariable(String),
    // 属性错误：实例和类上都找不到这个名字
    UndefinedProperty(String),
    // 调用错误：尝试调用一个非函数类型
    InvalidCall(String),
    // 实参个数和形参对不上
    ArityMismatch(String),
    // 栈溢出：递归太深
    StackOverflow,
    // 内存溢出：GC 后仍无法分配
    OutOfMemory,
    // 内部错误：字节码损坏或 VM 实现 Bug
    InternalError(String),
}

/// One stack-trace line: the frame's current source line plus the function name.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub line: usize,
    pub func_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VmError {
    pub kind: ErrorKind,
    pub line: usize,
    /// Innermost call first.
    pub stack_trace: Vec<TraceEntry>,
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [line {}]", self.get_message(), self.line)
    }
}

impl VmError {
    pub fn get_message(&self) -> String {
        match &self.kind {
            ErrorKind::TypeError(m) => self.format_with_fallback("TypeMismatchException", m),
            ErrorKind::InvalidCall(m) => self.format_with_fallback("IllegalInvocationException", m),
            ErrorKind::ArityMismatch(m) => self.format_with_fallback("ArityMismatchException", m),
            ErrorKind::UndefinedProperty(m) => {
                self.format_with_fallback("UndefinedPropertyException", m)
            }
            ErrorKind::InternalError(m) => {
                self.format_with_fallback("InternalExecutionException", m)
            }

            ErrorKind::UndefinedVariable(v) => {
                format!(
                    "UnresolvedSymbolException: reference to undefined variable '{}'",
                    v
                )
            }

            ErrorKind::StackOverflow => "StackOverflowError: call stack depth limit exceeded".into(),
            ErrorKind::OutOfMemory => "OutOfMemoryError: heap exhaustion during allocation".into(),
        }
    }

    fn format_with_fallback(&self, exception_name: &str, message: &str) -> String {
        if message.starts_with(exception_name) {
            message.to_string()
        } else {
            format!("{}: {}", exception_name, message)
        }
    }
}
