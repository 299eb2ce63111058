//! Embedded-side support code compiled into every context
//!
//! The helpers are Python, transpiled together with user units. Name
//! derivation reuses the prefixes from [`crate::names`] and argument encoding
//! comes from the active [`ArgumentCodec`], so host and embedded side always
//! agree.

use crate::{
    codec::ArgumentCodec,
    names::{CONTEXT_VARIABLE_PREFIX, HANDLE_PREFIX, PY_FUNCTION_PREFIX},
};

/// Callee name of the marker call rewritten into a boundary call
pub const MARKER: &str = "pycall";

/// Channel that delivers boundary call requests to the host
pub const EXECUTE_CHANNEL: &str = "IPython.notebook.kernel.execute";

/// Factory parameter holding the context id
pub const CONTEXT_ID_PARAM: &str = "__context_id";
/// Factory parameter holding the user data payload
pub const DATA_PARAM: &str = "__data";
/// Factory parameter holding the unique names of registered host functions
pub const HOST_FUNCTIONS_PARAM: &str = "__py_functions_names";

pub const UNIQUE_PY_FUNCTION_NAME: &str = "__unique_py_function_name__";
pub const CONVERT_ARGUMENT: &str = "__convert_py_argument__";
pub const CONVERT_STARRED_ARGUMENT: &str = "__convert_py_starred_argument__";
pub const CONVERT_KEYWORD_ARGUMENT: &str = "__convert_py_keyword_argument__";
pub const CONVERT_STARRED_KEYWORD_ARGUMENT: &str = "__convert_py_starred_keyword_argument__";
pub const JOIN_ARGUMENTS: &str = "__join_py_arguments__";
pub const CALLBACK_ADAPTER: &str = "__callback_adapter__";
pub const CONVERT_EXPORTS: &str = "__convert_exports__";

/// Initializer that always runs first: watches the context's cell and cleans
/// up host wrappers and globals once it is removed
pub const COMMON_INIT: &str = "__common_init__";

const SUPPORT_TEMPLATE: &str = r#"def __json_replacer__(key, value):
    return None if value == None else value


def __unique_py_function_name__(name, context_id):
    return '%PY_FUNCTION_PREFIX%_' + name + '_' + context_id


def __unique_context_variable_name__(context_id):
    return '%CONTEXT_VARIABLE_PREFIX%_' + context_id


def __unique_handle_name__(context_id):
    return '%HANDLE_PREFIX%_' + context_id


def __convert_py_argument__(arg):
    return __encode_value__(arg)


def __convert_py_starred_argument__(args):
    converted_args = []
    for arg in args:
        converted_args.push(__convert_py_argument__(arg))
    return converted_args.join(',')


def __convert_py_keyword_argument__(name, arg):
    return name + '=' + __convert_py_argument__(arg)


def __convert_py_starred_keyword_argument__(args):
    __pragma__('jsiter')
    converted_args = []
    for arg_name in args:
        converted_args.push(__convert_py_keyword_argument__(arg_name, args[arg_name]))
    __pragma__('nojsiter')
    return converted_args.join(',')


def __join_py_arguments__(converted_args):
    non_empty = []
    for arg in converted_args:
        if arg.length > 0:
            non_empty.push(arg)
    return non_empty.join(',')


def __callback_adapter__(callback, error_callback):
    def wrapper(result):
        if 'ename' in result.content:
            if error_callback:
                error_callback(result.content)
            else:
                console.error(result.content)
            return
        text = result.content.data['text/plain']
        text = text.substring(1, text.length - 1)
        return callback(JSON.parse(text))

    return wrapper


def __export_wrapper__(func):
    def wrapper(*args):
        decoded_args = []
        for arg in args:
            decoded_args.push(__decode_value__(arg))
        return func(*decoded_args)

    return wrapper


def __convert_exports__(exports):
    __pragma__('jsiter')
    converted = {}
    for func_name in exports:
        converted[func_name] = __export_wrapper__(exports[func_name])
    __pragma__('nojsiter')
    return converted


def __cleanup__():
    for py_func in __py_functions_names:
        IPython.notebook.kernel.execute('del ' + py_func)
    window[__unique_context_variable_name__(__context_id)] = js_undefined


def __common_init__():
    handle = document.getElementById(__unique_handle_name__(__context_id))
    cell = handle.closest('.cell')

    def callback(record, observer):
        for mutation in record:
            for node in mutation.removedNodes:
                if node.contains(handle) or node == handle:
                    __cleanup__()
                    observer.disconnect()
                    return

    observer = __new__(MutationObserver(callback))
    observer.observe(cell.parentElement, {'childList': True, 'subtree': True})
"#;

/// Python source of the support set, placed before user units
pub fn support_source(codec: &dyn ArgumentCodec) -> String {
    let support = SUPPORT_TEMPLATE
        .replace("%PY_FUNCTION_PREFIX%", PY_FUNCTION_PREFIX)
        .replace("%CONTEXT_VARIABLE_PREFIX%", CONTEXT_VARIABLE_PREFIX)
        .replace("%HANDLE_PREFIX%", HANDLE_PREFIX);
    format!("{}\n\n{support}", codec.embedded_helpers())
}
