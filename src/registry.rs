//! Command list table, pending calls, and auxiliary caches
//!
//! The registry is plain data. It does no locking and never calls the driver;
//! [`crate::collector::KernelCollector`] holds it behind its single mutex and
//! destroys any owned events of the commands the registry hands back.

use crate::clock::SubmitAnchor;
use crate::command::{Call, Command, CommandRef, GroupSize};
use crate::driver::{
    CommandListHandle, ContextHandle, DeviceHandle, EventHandle, ImageHandle, KernelHandle,
    QueueHandle,
};
use fnv::FnvHashMap;

/// Per-command-list record
#[derive(Debug)]
pub struct CommandListInfo {
    commands: Vec<Command>,
    pub context: ContextHandle,
    pub device: DeviceHandle,
    pub immediate: bool,
    epoch: u64,
    kernel_ids: Vec<u64>,
    call_ids: Vec<u64>,
}

impl CommandListInfo {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

/// Tracks command lists, their commands, and calls awaiting completion
#[derive(Debug)]
pub struct CommandRegistry {
    lists: FnvHashMap<CommandListHandle, CommandListInfo>,
    pending: Vec<Call>,
    group_sizes: FnvHashMap<KernelHandle, GroupSize>,
    image_sizes: FnvHashMap<ImageHandle, u64>,
    next_kernel_id: u64,
    next_epoch: u64,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            lists: FnvHashMap::default(),
            pending: Vec::new(),
            group_sizes: FnvHashMap::default(),
            image_sizes: FnvHashMap::default(),
            next_kernel_id: 1,
            next_epoch: 0,
        }
    }

    fn bump_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    fn info(&self, list: CommandListHandle) -> &CommandListInfo {
        self.lists
            .get(&list)
            .unwrap_or_else(|| panic!("command list {} is not registered", list))
    }

    fn info_mut(&mut self, list: CommandListHandle) -> &mut CommandListInfo {
        self.lists
            .get_mut(&list)
            .unwrap_or_else(|| panic!("command list {} is not registered", list))
    }

    /// Register a newly created command list
    ///
    /// # Panics
    ///
    /// Panics if the handle is already registered.
    pub fn create_list(
        &mut self,
        list: CommandListHandle,
        context: ContextHandle,
        device: DeviceHandle,
        immediate: bool,
    ) {
        assert!(
            !self.lists.contains_key(&list),
            "command list {} registered twice",
            list
        );
        let epoch = self.bump_epoch();
        self.lists.insert(
            list,
            CommandListInfo {
                commands: Vec::new(),
                context,
                device,
                immediate,
                epoch,
                kernel_ids: Vec::new(),
                call_ids: Vec::new(),
            },
        );
    }

    /// Take every command out of a list so the caller can free owned events
    fn release_commands(&mut self, list: CommandListHandle) -> Vec<Command> {
        let next_epoch = self.bump_epoch();
        let info = self
            .lists
            .get_mut(&list)
            .unwrap_or_else(|| panic!("command list {} is not registered", list));

        let epoch = info.epoch;
        assert!(
            !self
                .pending
                .iter()
                .any(|call| call.command.list == list && call.command.epoch == epoch),
            "command list {} freed while calls are still pending",
            list
        );

        info.epoch = next_epoch;
        std::mem::take(&mut info.commands)
    }

    /// Drop a destroyed command list; returns its commands for cleanup
    pub fn remove_list(&mut self, list: CommandListHandle) -> Vec<Command> {
        let commands = self.release_commands(list);
        self.lists.remove(&list);
        commands
    }

    /// Clear a reset command list; returns its commands for cleanup
    pub fn reset_list(&mut self, list: CommandListHandle) -> Vec<Command> {
        let commands = self.release_commands(list);
        let info = self.info_mut(list);
        info.kernel_ids.clear();
        info.call_ids.clear();
        commands
    }

    /// Append a command to its list, assigning the next kernel id
    pub fn add_command(&mut self, list: CommandListHandle, mut command: Command) -> CommandRef {
        let kernel_id = self.next_kernel_id;
        self.next_kernel_id += 1;
        command.kernel_id = kernel_id;

        let info = self.info_mut(list);
        info.kernel_ids.push(kernel_id);
        info.commands.push(command);

        CommandRef {
            list,
            epoch: info.epoch,
            slot: info.commands.len() - 1,
        }
    }

    /// Queue one call for completion tracking
    pub fn add_call(&mut self, mut call: Call) {
        let command = self.command_mut(call.command);
        command.call_count += 1;
        call.call_id = command.call_count;

        let call_id = call.call_id;
        self.info_mut(call.command.list).call_ids.push(call_id);
        self.pending.push(call);
    }

    /// Materialize one call per command held by a deferred list
    ///
    /// The list's call-id bookkeeping is reset first; returns the number of
    /// calls queued.
    pub fn add_calls(
        &mut self,
        list: CommandListHandle,
        queue: QueueHandle,
        anchor: SubmitAnchor,
    ) -> usize {
        let info = self.info_mut(list);
        assert!(
            !info.immediate,
            "batch submission of immediate command list {}",
            list
        );
        info.call_ids.clear();

        let epoch = info.epoch;
        let slots = info.commands.len();
        for slot in 0..slots {
            let cref = CommandRef { list, epoch, slot };
            assert!(
                self.command(cref).append_time <= anchor.host_time,
                "command submitted before it was appended"
            );
            self.add_call(Call::new(cref, queue, anchor));
        }
        slots
    }

    /// Resolve a command reference
    ///
    /// # Panics
    ///
    /// Panics if the command was freed by a reset or destroy.
    pub fn command(&self, cref: CommandRef) -> &Command {
        let info = self.info(cref.list);
        assert_eq!(
            info.epoch, cref.epoch,
            "call references a freed command of list {}",
            cref.list
        );
        &info.commands[cref.slot]
    }

    fn command_mut(&mut self, cref: CommandRef) -> &mut Command {
        let info = self.info_mut(cref.list);
        assert_eq!(
            info.epoch, cref.epoch,
            "call references a freed command of list {}",
            cref.list
        );
        &mut info.commands[cref.slot]
    }

    pub fn contains_list(&self, list: CommandListHandle) -> bool {
        self.lists.contains_key(&list)
    }

    pub fn list(&self, list: CommandListHandle) -> Option<&CommandListInfo> {
        self.lists.get(&list)
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn context(&self, list: CommandListHandle) -> ContextHandle {
        self.info(list).context
    }

    pub fn device(&self, list: CommandListHandle) -> DeviceHandle {
        self.info(list).device
    }

    pub fn is_immediate(&self, list: CommandListHandle) -> bool {
        self.info(list).immediate
    }

    /// Kernel ids appended to the list since its creation or last reset
    pub fn kernel_ids(&self, list: CommandListHandle) -> &[u64] {
        &self.info(list).kernel_ids
    }

    /// Call ids produced by the list's latest submission
    pub fn call_ids(&self, list: CommandListHandle) -> &[u64] {
        &self.info(list).call_ids
    }

    pub fn pending(&self) -> &[Call] {
        &self.pending
    }

    /// Index of the pending call waiting on `event`
    pub fn find_pending(&self, event: EventHandle) -> Option<usize> {
        self.pending
            .iter()
            .position(|call| self.command(call.command).event.event() == event)
    }

    /// Remove a pending call, preserving the order of the rest
    pub fn remove_pending(&mut self, index: usize) -> Call {
        self.pending.remove(index)
    }

    pub fn set_group_size(&mut self, kernel: KernelHandle, size: GroupSize) {
        self.group_sizes.insert(kernel, size);
    }

    pub fn remove_group_size(&mut self, kernel: KernelHandle) {
        self.group_sizes.remove(&kernel);
    }

    /// Group size last set on a kernel; zeroes when never set
    pub fn group_size(&self, kernel: KernelHandle) -> GroupSize {
        self.group_sizes.get(&kernel).copied().unwrap_or_default()
    }

    pub fn add_image(&mut self, image: ImageHandle, size: u64) {
        let previous = self.image_sizes.insert(image, size);
        assert!(previous.is_none(), "image {} registered twice", image);
    }

    pub fn remove_image(&mut self, image: ImageHandle) {
        let removed = self.image_sizes.remove(&image);
        assert!(removed.is_some(), "image {} is not registered", image);
    }

    /// Byte size of an image; zero when unknown
    pub fn image_size(&self, image: ImageHandle) -> u64 {
        self.image_sizes.get(&image).copied().unwrap_or(0)
    }
}
