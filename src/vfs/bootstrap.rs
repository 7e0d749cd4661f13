//! The compiled-in `/bin` bundle (§4.8). Every boot re-installs these
//! scripts unconditionally, owner-rwx and protected, so a guest can never
//! shadow or delete the base utilities by writing over `/bin`.

use crate::vfs::node::Permissions;
use crate::vfs::Vfs;

/// One compiled-in system script: its guest-visible name under `/bin` and
/// its Lua source.
struct BuiltinScript {
    name: &'static str,
    source: &'static str,
}

const ECHO: &str = r#"
local args = {...}
output(table.concat(args, " ") .. "\n")
"#;

const CAT: &str = r#"
local args = {...}
if #args == 0 then
    local data, err = input_all()
    errors.ok(err, "cat: failed to read stdin")
    output(data)
    return
end
for _, path in ipairs(args) do
    local fd, err = file.open(path, "r")
    errors.ok(err, "cat: cannot open " .. path)
    local data
    data, err = file.read_all(fd)
    errors.ok(err, "cat: read failed for " .. path)
    output(data)
    file.close(fd)
end
"#;

const LS: &str = r#"
local args = {...}
local dir = args[1] or "."
local names, err = file.readdir(dir)
errors.ok(err, "ls: cannot read " .. dir)
table.sort(names)
output(table.concat(names, "\n"))
if #names > 0 then
    output("\n")
end
"#;

const PWD: &str = r#"
local cwd, err = process.cwd()
errors.ok(err, "pwd: failed")
output(cwd .. "\n")
"#;

const CLEAR: &str = r#"
local ok, err = terminal.clear()
errors.ok(err, "clear: failed")
"#;

const SCRIPTS: &[BuiltinScript] = &[
    BuiltinScript { name: "echo", source: ECHO },
    BuiltinScript { name: "cat", source: CAT },
    BuiltinScript { name: "ls", source: LS },
    BuiltinScript { name: "pwd", source: PWD },
    BuiltinScript { name: "clear", source: CLEAR },
];

/// Install the compiled-in bundle under `/bin`, overwriting whatever is
/// there. Called once per boot, before any process is created.
pub fn install(vfs: &Vfs) {
    vfs.install_system_directory("/bin");
    for script in SCRIPTS {
        let path = format!("/bin/{}", script.name);
        vfs.install_system_file(&path, script.source.as_bytes(), Permissions::owner_rwx());
    }
}
